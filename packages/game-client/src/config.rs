use std::env;
use std::time::Duration;

use shared::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Websocket URL, without the `player_id` query parameter.
    pub endpoint: String,
    pub player_id: String,
    /// Refetch period while the real-time channel is down.
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// Tick period once the running clock is under `fast_tick_threshold`.
    pub fast_tick_interval: Duration,
    pub fast_tick_threshold: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: &str, player_id: &str) -> Self {
        ClientConfig {
            endpoint: endpoint.to_string(),
            player_id: player_id.to_string(),
            poll_interval: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
            fast_tick_interval: Duration::from_millis(100),
            fast_tick_threshold: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |name: &str| lookup(name).ok_or_else(|| ConfigError::Missing(name.to_string()));

        let mut config = ClientConfig::new(
            &required("BANCHESS_WS_ENDPOINT")?,
            &required("BANCHESS_PLAYER_ID")?,
        );
        if let Some(value) = lookup("BANCHESS_POLL_INTERVAL_MS") {
            let millis = value.parse().map_err(|_| ConfigError::Invalid {
                name: "BANCHESS_POLL_INTERVAL_MS".to_string(),
                value,
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Endpoint with the player id the `$connect` route expects.
    pub fn connect_url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}player_id={}", self.endpoint, separator, self.player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(|name| match name {
            "BANCHESS_WS_ENDPOINT" => Some("wss://example.com/prod".to_string()),
            "BANCHESS_PLAYER_ID" => Some("alice".to_string()),
            "BANCHESS_POLL_INTERVAL_MS" => Some("500".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.connect_url(), "wss://example.com/prod?player_id=alice");
    }

    #[test]
    fn test_missing_player_id() {
        let result = ClientConfig::from_lookup(|name| {
            (name == "BANCHESS_WS_ENDPOINT").then(|| "wss://example.com".to_string())
        });

        assert_eq!(
            result,
            Err(ConfigError::Missing("BANCHESS_PLAYER_ID".to_string()))
        );
    }
}
