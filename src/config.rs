use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Read an environment variable, treating empty values as unset.
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Application configuration: JSON file with serde defaults for every field,
/// plus `CARGOHOLD_*` environment overrides for deployment knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend; only `"local"` ships with this binary.
    #[serde(rename = "type", default = "default_storage_type")]
    pub kind: String,
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_upload_session_timeout_secs")]
    pub upload_session_timeout_secs: u64,
    #[serde(default = "default_upload_sweep_interval_secs")]
    pub upload_sweep_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_write_timeout_secs() -> u64 {
    15
}

fn default_storage_type() -> String {
    "local".to_string()
}

fn default_base_dir() -> String {
    "./data".to_string()
}

fn default_upload_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_upload_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_type(),
            base_dir: default_base_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            upload_session_timeout_secs: default_upload_session_timeout_secs(),
            upload_sweep_interval_secs: default_upload_sweep_interval_secs(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl RegistryConfig {
    pub fn upload_session_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_session_timeout_secs)
    }

    pub fn upload_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.upload_sweep_interval_secs)
    }
}

impl Config {
    /// Load from a JSON file when given, otherwise start from defaults; then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = env_var("CARGOHOLD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_var("CARGOHOLD_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(kind) = env_var("CARGOHOLD_STORAGE_TYPE") {
            self.storage.kind = kind;
        }
        if let Some(base_dir) = env_var("CARGOHOLD_STORAGE_BASE_DIR") {
            self.storage.base_dir = base_dir;
        }
        if let Some(timeout) =
            env_var("CARGOHOLD_UPLOAD_SESSION_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.registry.upload_session_timeout_secs = timeout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.kind, "local");
        assert_eq!(config.storage.base_dir, "./data");
        assert_eq!(
            config.registry.upload_session_timeout(),
            Duration::from_secs(30 * 60)
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"server": {"port": 5000}, "storage": {"base_dir": "/srv/registry"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.kind, "local");
        assert_eq!(config.storage.base_dir, "/srv/registry");
        assert_eq!(config.registry.upload_sweep_interval_secs, 60);
    }

    #[test]
    fn storage_type_uses_type_key() {
        let config: Config =
            serde_json::from_str(r#"{"storage": {"type": "s3"}}"#).unwrap();
        assert_eq!(config.storage.kind, "s3");
    }
}
