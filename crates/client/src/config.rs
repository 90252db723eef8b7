//! Client configuration.
//!
//! Resolved from: explicit path > `~/.kikx/client.toml` > defaults, then
//! `KIKX_*` environment overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kikx_protocol::Identity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LoggingConfig;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Reconnect policy: fixed delay, bounded attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP origin of the host, e.g. `https://desk.example.org`
    pub server_url: String,
    /// Set when running inside a hosted app
    pub app_id: Option<String>,
    /// Previously assigned shell client id, if any
    pub client_id: Option<String>,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            app_id: None,
            client_id: None,
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config and apply environment overrides.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("KIKX_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(id) = lookup("KIKX_APP_ID").filter(|v| !v.trim().is_empty()) {
            self.app_id = Some(id);
        }
        if let Some(id) = lookup("KIKX_CLIENT_ID").filter(|v| !v.trim().is_empty()) {
            self.client_id = Some(id);
        }
        if let Some(value) = lookup("KIKX_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = parse_number("KIKX_RECONNECT_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("KIKX_RECONNECT_DELAY_MS") {
            self.reconnect.delay_ms = parse_number("KIKX_RECONNECT_DELAY_MS", &value)?;
        }
        Ok(())
    }

    /// Identity this config starts with. An app id wins over a client id.
    pub fn identity(&self) -> Identity {
        match (&self.app_id, &self.client_id) {
            (Some(app_id), _) => Identity::app(app_id.clone()),
            (None, Some(client_id)) => Identity::client(client_id.clone()),
            (None, None) => Identity::unassigned_client(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kikx").join("client.toml"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_reconnect_policy() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay(), Duration::from_secs(1));
        assert_eq!(config.identity(), Identity::unassigned_client());
    }

    #[test]
    fn loads_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server_url = \"https://desk.example.org\"\napp_id = \"a-42\"\n\n[reconnect]\ndelay_ms = 250\n"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_url, "https://desk.example.org");
        assert_eq!(config.reconnect.delay_ms, 250);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.identity(), Identity::app("a-42"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reconnect = 5").unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply_on_top() {
        let env: HashMap<&str, &str> = [
            ("KIKX_SERVER_URL", "http://10.0.0.2:9000"),
            ("KIKX_CLIENT_ID", "c-7"),
            ("KIKX_RECONNECT_ATTEMPTS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server_url, "http://10.0.0.2:9000");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.identity(), Identity::client("c-7"));
    }

    #[test]
    fn bad_numeric_override_is_rejected() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_overrides(|key| (key == "KIKX_RECONNECT_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "KIKX_RECONNECT_DELAY_MS",
                ..
            }
        ));
    }
}
