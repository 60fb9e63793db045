use std::{collections::HashMap, net::SocketAddr};

use anyhow::Result;
use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::data_model::Strategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Container image functions are launched from.
    pub image: String,
    /// Docker daemon address; platform defaults when absent.
    pub docker_addr: Option<String>,
    /// Seconds an idle container may live before reclamation.
    pub warm_time: u64,
    /// Seconds between janitor passes.
    pub janitor_sleep: u64,
    /// Concurrency cap for pools created on first reference.
    pub default_concurrency_cap: usize,
    /// Pools created at startup with their own caps.
    pub preconfigured_pools: HashMap<String, usize>,
    pub initial_strategy: Strategy,
    /// Extra launch attempts after a failure before giving up.
    pub launch_retries: u32,
    /// Seconds a launched container may take to become reachable.
    pub launch_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8190".to_string(),
            image: "faas-function:latest".to_string(),
            docker_addr: None,
            warm_time: 20,
            janitor_sleep: 5,
            default_concurrency_cap: 3,
            preconfigured_pools: HashMap::new(),
            initial_strategy: Strategy::Lru,
            launch_retries: 1,
            launch_timeout: 30,
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(&config_str))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.image.is_empty() {
            return Err(anyhow::anyhow!("image must not be empty"));
        }
        if self.default_concurrency_cap == 0 {
            return Err(anyhow::anyhow!("default_concurrency_cap must be at least 1"));
        }
        for (function_id, cap) in &self.preconfigured_pools {
            if *cap == 0 {
                return Err(anyhow::anyhow!(
                    "concurrency cap for pool {} must be at least 1",
                    function_id
                ));
            }
        }
        if self.janitor_sleep == 0 {
            return Err(anyhow::anyhow!("janitor_sleep must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
listen_addr: "127.0.0.1:9000"
warm_time: 5
initial_strategy: mru
preconfigured_pools:
  fn_a: 4
"#;
        let config: ServerConfig = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.warm_time, 5);
        assert_eq!(config.initial_strategy, Strategy::Mru);
        assert_eq!(config.preconfigured_pools.get("fn_a"), Some(&4));
        // Untouched keys keep their defaults.
        assert_eq!(config.janitor_sleep, 5);
        assert_eq!(config.default_concurrency_cap, 3);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let mut config = ServerConfig::default();
        config.default_concurrency_cap = 0;
        assert!(config.validate().is_err());
    }
}
