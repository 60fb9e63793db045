use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod data_model;
mod driver;
mod http_objects;
mod janitor;
mod pool;
mod routes;
mod scheduler;
mod service;
mod stats;

#[cfg(test)]
mod integration_test;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => match config::ServerConfig::from_path(&path.to_string_lossy()) {
            Ok(config) => config,
            Err(err) => {
                error!("error loading config: {:?}", err);
                return;
            }
        },
        None => config::ServerConfig::default(),
    };
    let service = match service::Service::new(config) {
        Ok(service) => service,
        Err(err) => {
            error!("error initializing service: {:?}", err);
            return;
        }
    };
    if let Err(err) = service.start().await {
        error!("error starting service: {}", err);
    }
}
