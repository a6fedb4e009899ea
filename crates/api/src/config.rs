//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use batchline_infra::CoordinatorConfig;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const BIND_ADDR: &str = "BIND_ADDR";
pub const TRANSACTION_TIMEOUT_MS: &str = "BATCHLINE_TRANSACTION_TIMEOUT_MS";
pub const MAX_CONNECTIONS: &str = "BATCHLINE_MAX_CONNECTIONS";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:0";
const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Locator of the shared store.
    pub database_url: String,
    /// `0.0.0.0:0` binds an ephemeral port; the chosen one is logged.
    pub bind_addr: SocketAddr,
    pub transaction_timeout: Duration,
    pub max_connections: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(DATABASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL))?;

        let bind_addr: SocketAddr = parse_or(&lookup, BIND_ADDR, || {
            DEFAULT_BIND_ADDR.parse().map_err(|e| invalid(BIND_ADDR, e))
        })?;

        let timeout_ms: u64 = parse_or(&lookup, TRANSACTION_TIMEOUT_MS, || {
            Ok(DEFAULT_TRANSACTION_TIMEOUT_MS)
        })?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: TRANSACTION_TIMEOUT_MS,
                message: "must be greater than zero".to_string(),
            });
        }

        let max_connections: u32 = parse_or(&lookup, MAX_CONNECTIONS, || Ok(DEFAULT_MAX_CONNECTIONS))?;

        Ok(Self {
            database_url,
            bind_addr,
            transaction_timeout: Duration::from_millis(timeout_ms),
            max_connections,
        })
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_name(self.bind_addr.to_string())
            .with_transaction_timeout(self.transaction_timeout)
    }
}

fn parse_or<F, T, D>(lookup: &F, name: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> Result<T, ConfigError>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(name, e)),
        None => default(),
    }
}

fn invalid(name: &'static str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        name,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = AppConfig::from_lookup(lookup(&[(DATABASE_URL, "postgres://db/x")])).unwrap();

        assert_eq!(config.database_url, "postgres://db/x");
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.transaction_timeout, Duration::from_secs(30));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.coordinator_config().batch_size, 2);
    }

    #[test]
    fn database_url_is_required() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(DATABASE_URL)));

        let err = AppConfig::from_lookup(lookup(&[(DATABASE_URL, "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(DATABASE_URL)));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/x"),
            (BIND_ADDR, "127.0.0.1:8080"),
            (TRANSACTION_TIMEOUT_MS, "1500"),
            (MAX_CONNECTIONS, "3"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.transaction_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/x"),
            (MAX_CONNECTIONS, "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: MAX_CONNECTIONS, .. }));

        let err = AppConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/x"),
            (TRANSACTION_TIMEOUT_MS, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: TRANSACTION_TIMEOUT_MS, .. }));
    }
}
