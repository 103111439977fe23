use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live websocket connection and the game topic it follows. Stored in the
/// connections table keyed by `connection_id`, with a `GameIdIndex` on
/// `game_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: String,
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(connection_id: &str, player_id: &str) -> Self {
        Connection {
            connection_id: connection_id.to_string(),
            player_id: player_id.to_string(),
            game_id: None,
            connected_at: Utc::now(),
        }
    }
}
