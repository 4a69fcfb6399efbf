use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/server.json";
pub const LISTEN_ADDR_ENV: &str = "BLINK_LISTEN_ADDR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            stats_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// `BLINK_LISTEN_ADDR` (from the process environment or `.env`) wins over
    /// the file value.
    pub fn apply_env(mut self) -> Self {
        if let Ok(addr) = env::var(LISTEN_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.listen_addr = addr.trim().to_string();
            }
        }
        self
    }
}

pub fn load_config(path: &str) -> ServerConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ServerConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ServerConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ServerConfig::default()
        }
    }
}
