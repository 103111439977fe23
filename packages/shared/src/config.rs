use std::env;
use std::fmt;

use crate::models::game::TimeControl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(String),
    Invalid { name: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "{} environment variable must be set", name)
            }
            ConfigError::Invalid { name, value } => {
                write!(f, "Invalid value for {}: {}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for the lambda handlers, read from the environment at cold start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub games_table: String,
    pub moves_table: String,
    pub connections_table: String,
    pub websocket_api_endpoint: Option<String>,
    pub default_time_control: TimeControl,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| lookup(name).ok_or_else(|| ConfigError::Missing(name.to_string()));
        let millis = |name: &str, default: u64| -> Result<u64, ConfigError> {
            match lookup(name) {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    name: name.to_string(),
                    value,
                }),
                None => Ok(default),
            }
        };

        let defaults = TimeControl::default();
        Ok(ServerConfig {
            games_table: required("GAMES_TABLE")?,
            moves_table: required("MOVES_TABLE")?,
            connections_table: required("PLAYER_CONNECTIONS_TABLE")?,
            websocket_api_endpoint: lookup("WEBSOCKET_API_ENDPOINT"),
            default_time_control: TimeControl::new(
                millis("DEFAULT_INITIAL_TIME_MS", defaults.initial_time)?,
                millis("DEFAULT_INCREMENT_MS", defaults.increment)?,
            ),
        })
    }
}
