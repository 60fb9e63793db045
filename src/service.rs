use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum_server::Handle;
use tokio::{signal, sync::watch};
use tracing::info;

use crate::{
    config::ServerConfig,
    driver::DockerDriver,
    janitor::Janitor,
    routes::{RouteState, create_routes},
    scheduler::Scheduler,
};

pub struct Service {
    pub config: ServerConfig,
    scheduler: Arc<Scheduler>,
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let driver = Arc::new(
            DockerDriver::new(
                config.docker_addr.as_deref(),
                Duration::from_secs(config.launch_timeout),
            )
            .context("error initializing container driver")?,
        );
        let scheduler = Scheduler::new(&config, driver);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Ok(Self {
            config,
            scheduler,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let janitor = Janitor::new(
            self.scheduler.clone(),
            Duration::from_secs(self.config.warm_time),
            Duration::from_secs(self.config.janitor_sleep),
            self.shutdown_rx.clone(),
        );
        tokio::spawn(janitor.start());

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!(
            strategy = %self.scheduler.strategy(),
            "server api listening on {}",
            self.config.listen_addr
        );
        let routes = create_routes(RouteState {
            scheduler: self.scheduler.clone(),
        });
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        // The janitor observed the shutdown signal before the server
        // stopped accepting; now drop the warm pools.
        info!("draining pools");
        self.scheduler.drain().await;
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(Some(Duration::from_secs(5)));
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down server gracefully");
}
