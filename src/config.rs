// ⚙️ Runtime configuration
//
// Defaults, overridden by POSTAL_HISTORY_* environment variables.
// Invalid values are rejected, never silently replaced.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::logging::{normalize_level, LOG_LEVELS};

pub const ENV_DB: &str = "POSTAL_HISTORY_DB";
pub const ENV_ADDR: &str = "POSTAL_HISTORY_ADDR";
pub const ENV_LOG_LEVEL: &str = "POSTAL_HISTORY_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "POSTAL_HISTORY_LOG_DIR";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is empty")]
    Empty { var: &'static str },

    #[error("{var}='{value}' is not a socket address (host:port)")]
    BadAddress { var: &'static str, value: String },

    #[error("{var}='{value}' is not a log level (expected one of {expected})")]
    BadLevel {
        var: &'static str,
        value: String,
        expected: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub server_addr: SocketAddr,
    pub log_level: String,
    /// None logs to stderr
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: PathBuf::from("postal_history.db"),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Defaults with the process environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults with overrides taken from `lookup` (variable name → value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(raw) = lookup(ENV_DB) {
            config.db_path = PathBuf::from(non_empty(ENV_DB, &raw)?);
        }
        if let Some(raw) = lookup(ENV_ADDR) {
            let value = non_empty(ENV_ADDR, &raw)?;
            config.server_addr = value.parse().map_err(|_| ConfigError::BadAddress {
                var: ENV_ADDR,
                value: value.to_string(),
            })?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            let value = non_empty(ENV_LOG_LEVEL, &raw)?;
            config.log_level = normalize_level(value)
                .ok_or_else(|| ConfigError::BadLevel {
                    var: ENV_LOG_LEVEL,
                    value: value.to_string(),
                    expected: LOG_LEVELS.join(", "),
                })?
                .to_string();
        }
        if let Some(raw) = lookup(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(non_empty(ENV_LOG_DIR, &raw)?));
        }

        Ok(config)
    }
}

fn non_empty<'a>(var: &'static str, raw: &'a str) -> Result<&'a str, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        Err(ConfigError::Empty { var })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_DB, "/tmp/catalog.db"),
            (ENV_ADDR, "0.0.0.0:8080"),
            (ENV_LOG_LEVEL, "DEBUG"),
            (ENV_LOG_DIR, "/var/log/postal"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/catalog.db"));
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/postal")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_lookup(lookup(&[(ENV_ADDR, "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::BadAddress { .. }));

        let err = AppConfig::from_lookup(lookup(&[(ENV_LOG_LEVEL, "loud")])).unwrap_err();
        assert!(err.to_string().contains("error, warn, info, debug, trace"));

        let err = AppConfig::from_lookup(lookup(&[(ENV_DB, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty { var: ENV_DB });
    }
}
