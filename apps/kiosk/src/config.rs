//! Configuration management for the attendance server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The binaries call `dotenvy::dotenv()` first, so a `.env` file works too.
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8080` |
//! | `DATABASE_URL` | unset: in-memory stores |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `DATABASE_CONNECT_TIMEOUT` | `30` (seconds) |
//! | `SHUTDOWN_TIMEOUT` | `30` (seconds) |
//! | `KIOSK_EVENTS` | `Event A,Event B,Event C` |
//! | `SEED_ON_START` | `false` |

use kiosk_core::attendance::EventName;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        reason: &'static str,
    },
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Database; `None` runs on in-memory stores
    pub database: Option<DatabaseConfig>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Events offered to the kiosk
    pub events: Vec<EventName>,
    /// Load the sample attendees at startup
    pub seed_on_start: bool,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database = match var("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse(&var, "DATABASE_MAX_CONNECTIONS", 10, "a positive integer")?,
                connect_timeout: Duration::from_secs(parse(
                    &var,
                    "DATABASE_CONNECT_TIMEOUT",
                    30,
                    "seconds",
                )?),
            }),
            None => None,
        };

        let events = var("KIOSK_EVENTS").map_or_else(crate::validation::default_events, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(EventName::new)
                .collect()
        });

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&var, "PORT", 8080, "a port number")?,
            database,
            shutdown_timeout: Duration::from_secs(parse(&var, "SHUTDOWN_TIMEOUT", 30, "seconds")?),
            events,
            seed_on_start: parse_flag(&var, "SEED_ON_START")?,
        })
    }

    /// Address to bind the HTTP server to.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `HOST` is not an IP address.
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "HOST",
                value: self.host.clone(),
                reason: "an IP address",
            })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            reason,
        }),
    }
}

fn parse_flag(var: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<bool, ConfigError> {
    match var(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(value) => Err(ConfigError::Invalid {
            name,
            value,
            reason: "a boolean",
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.port, 8080);
        assert!(config.database.is_none());
        assert_eq!(config.events.len(), 3);
        assert!(!config.seed_on_start);
        assert_eq!(config.bind_address().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_database_settings() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/kiosk"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("DATABASE_CONNECT_TIMEOUT", "5"),
        ])
        .unwrap();

        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 4);
        assert_eq!(database.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_event_catalog_from_env() {
        let config = config(&[("KIOSK_EVENTS", "Keynote, Workshop ,,")]).unwrap();
        assert_eq!(
            config.events,
            vec![EventName::new("Keynote"), EventName::new("Workshop")]
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));

        let err = config(&[("SEED_ON_START", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SEED_ON_START", .. }));
    }

    #[test]
    fn test_seed_flag() {
        assert!(config(&[("SEED_ON_START", "true")]).unwrap().seed_on_start);
        assert!(!config(&[("SEED_ON_START", "0")]).unwrap().seed_on_start);
    }
}
