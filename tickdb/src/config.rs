//! Server configuration module.
//!
//! This module provides configuration loading for the tickdb server from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `TICKDB_DATABASE_DIRECTORY`: Directory where database files are stored (default: `./data`)
//! - `TICKDB_LISTEN_PORT`: Port to listen on (default: `9527`)

use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory where database files are stored.
    /// Each database lives at `{database_directory}/{name}.tick`.
    pub database_directory: PathBuf,
    /// Port to listen on for HTTP requests.
    pub listen_port: u16,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 9527;
    /// Default database directory.
    pub const DEFAULT_DATABASE_DIRECTORY: &'static str = "./data";

    pub const DATABASE_DIRECTORY_VAR: &'static str = "TICKDB_DATABASE_DIRECTORY";
    pub const LISTEN_PORT_VAR: &'static str = "TICKDB_LISTEN_PORT";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TICKDB_LISTEN_PORT` is set but not a valid port
    /// number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_directory = lookup(Self::DATABASE_DIRECTORY_VAR)
            .filter(|value| !value.is_empty())
            .map_or_else(
                || PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY),
                PathBuf::from,
            );

        let listen_port = match lookup(Self::LISTEN_PORT_VAR) {
            Some(value) => parse_port(&value)?,
            None => Self::DEFAULT_PORT,
        };

        Ok(Self {
            database_directory,
            listen_port,
        })
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: ServerConfig::LISTEN_PORT_VAR.to_string(),
            message: format!("'{value}' is not a valid port number (must be 1-65535)"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config.listen_port, 9527);
        assert_eq!(config.database_directory, PathBuf::from("./data"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TICKDB_DATABASE_DIRECTORY", "/var/lib/tickdb"),
            ("TICKDB_LISTEN_PORT", "8080"),
        ])
        .expect("overrides");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.database_directory, PathBuf::from("/var/lib/tickdb"));
    }

    #[test]
    fn test_invalid_port() {
        for value in ["http", "70000", "0", "-1"] {
            let err = load(&[("TICKDB_LISTEN_PORT", value)]).expect_err("invalid port");
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        }
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
