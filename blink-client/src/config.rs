use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";
pub const DEFAULT_IDENTITY_PATH: &str = "data/client_id";
pub const SERVER_ADDR_ENV: &str = "BLINK_SERVER_ADDR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    pub display_name: String,
    pub download_dir: PathBuf,
    pub chunk_pacing_ms: u64,
    pub negotiation_timeout_secs: u64,
    pub max_file_size_mb: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5000".to_string(),
            display_name: default_display_name(),
            download_dir: PathBuf::from("data/downloads"),
            chunk_pacing_ms: 5,
            negotiation_timeout_secs: 30,
            max_file_size_mb: 1024,
        }
    }
}

impl ClientConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pacing: Duration::from_millis(self.chunk_pacing_ms),
            download_dir: Some(self.download_dir.clone()),
            max_file_size: self.max_file_size_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn apply_env(mut self) -> Self {
        if let Ok(addr) = env::var(SERVER_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.server_addr = addr.trim().to_string();
            }
        }
        self
    }
}

fn default_display_name() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Anonymous".to_string())
}

pub fn load_config(path: &str) -> ClientConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ClientConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ClientConfig::default()
        }
    }
}

/// Load the client id from disk, or generate a new one and persist it.
pub fn load_or_generate_identity(path: &Path) -> std::io::Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if Uuid::parse_str(existing).is_ok() {
            log::info!("Loaded client id from {}", path.display());
            return Ok(existing.to_string());
        }
        log::warn!(
            "Client id file {} is corrupted, generating a new id",
            path.display()
        );
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    log::info!("Generated new client id and saved to {}", path.display());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config("/definitely/not/here.json");
        assert_eq!(config.server_addr, "127.0.0.1:5000");
        assert_eq!(config.chunk_pacing_ms, 5);
        assert_eq!(config.download_dir, PathBuf::from("data/downloads"));
    }

    #[test]
    fn partial_file_fills_remaining_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{"display_name": "Lan", "chunk_pacing_ms": 0}"#).unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.display_name, "Lan");
        assert_eq!(config.session_settings().pacing, Duration::ZERO);
        assert_eq!(config.negotiation_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_settings().max_file_size, 1024 * 1024 * 1024);
    }

    #[test]
    fn identity_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("client_id");

        let first = load_or_generate_identity(&path).unwrap();
        let second = load_or_generate_identity(&path).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn corrupted_identity_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_id");
        fs::write(&path, "not-a-uuid").unwrap();

        let id = load_or_generate_identity(&path).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap(), id);
    }
}
