//! Configuration
//!
//! Values come from an optional `config.toml`, overridden by environment
//! variables, overridden again by CLI flags in the binary. The data
//! directory defaults to `~/.local/share/rcode/`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ClassifiedError;

/// Environment variable switching HTTPS serving on
pub const ENV_TLS_ENABLED: &str = "RCODE_TLS_ENABLED";
/// Environment variable overriding the model endpoint base URL
pub const ENV_MSG_PROXY: &str = "MSG_PROXY";
/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "RCODE_DATA_DIR";

/// Default model endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind host
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// HTTPS port used when TLS is enabled
    pub tls_port: u16,
    /// Serve HTTPS instead of HTTP
    pub tls_enabled: bool,
    /// TLS certificate path (PEM)
    pub tls_cert: Option<PathBuf>,
    /// TLS private key path (PEM)
    pub tls_key: Option<PathBuf>,
    /// Data directory holding rcode.db and auth.json
    pub data_dir: PathBuf,
    /// Model endpoint base URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Maximum output tokens per model request
    pub max_tokens: u32,
    /// Stream model responses
    pub streaming: bool,
    /// Default project root for new sessions
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7420,
            tls_port: 7443,
            tls_enabled: false,
            tls_cert: None,
            tls_key: None,
            data_dir: default_data_dir(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            streaming: false,
            project_root: PathBuf::from("."),
        }
    }
}

/// `~/.local/share/rcode/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("rcode")
}

impl Config {
    /// Load from an optional config file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ClassifiedError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ClassifiedError::permanent(format!(
                        "config unreadable at {}: {e}",
                        path.display()
                    ))
                })?;
                toml::from_str(&raw)
                    .map_err(|e| ClassifiedError::permanent(format!("config malformed: {e}")))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `RCODE_TLS_ENABLED`, `MSG_PROXY`, and `RCODE_DATA_DIR`
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ENV_TLS_ENABLED) {
            self.tls_enabled = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var(ENV_MSG_PROXY) {
            if !value.is_empty() {
                self.endpoint = value;
            }
        }
        if let Ok(value) = std::env::var(ENV_DATA_DIR) {
            if !value.is_empty() {
                self.data_dir = PathBuf::from(value);
            }
        }
    }

    /// Path to the database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rcode.db")
    }

    /// Effective bind port given the TLS switch
    pub fn effective_port(&self) -> u16 {
        if self.tls_enabled {
            self.tls_port
        } else {
            self.port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert!(!config.tls_enabled);
        assert!(config.data_dir.ends_with("rcode"));
        assert_eq!(config.effective_port(), config.port);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "port = 9000\nmodel = \"test-model\"\nstreaming = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.model, "test-model");
        assert!(config.streaming);
        // Unset fields keep their defaults
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.port, Config::default().port);
    }

    #[test]
    fn test_malformed_file_is_permanent_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_tls_switch_changes_port() {
        let config = Config {
            tls_enabled: true,
            ..Config::default()
        };
        assert_eq!(config.effective_port(), config.tls_port);
    }
}
