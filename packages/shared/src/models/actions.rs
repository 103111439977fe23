use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::events::GameEvent;
use crate::models::game::Game;
use crate::models::move_record::{BanRecord, MoveRecord};

/// Legal destinations keyed by origin square.
pub type LegalMoveMap = BTreeMap<String, Vec<String>>;

/// A message sent by a client over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRequest {
    pub request_id: String,
    pub game_id: String,
    #[serde(flatten)]
    pub action: ClientAction,
}

impl ClientRequest {
    pub fn new(request_id: &str, game_id: &str, action: ClientAction) -> Self {
        ClientRequest {
            request_id: request_id.to_string(),
            game_id: game_id.to_string(),
            action,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    GetGame,
    GetMoves,
    GetLegalMoves,
    MakeMove {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
    BanMove {
        from: String,
        to: String,
    },
    Resign,
    OfferDraw,
    AcceptDraw,
    DeclineDraw,
    OfferRematch,
    AcceptRematch,
    DeclineRematch,
    CheckTime,
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::Subscribe => "subscribe",
            ClientAction::Unsubscribe => "unsubscribe",
            ClientAction::GetGame => "get_game",
            ClientAction::GetMoves => "get_moves",
            ClientAction::GetLegalMoves => "get_legal_moves",
            ClientAction::MakeMove { .. } => "make_move",
            ClientAction::BanMove { .. } => "ban_move",
            ClientAction::Resign => "resign",
            ClientAction::OfferDraw => "offer_draw",
            ClientAction::AcceptDraw => "accept_draw",
            ClientAction::DeclineDraw => "decline_draw",
            ClientAction::OfferRematch => "offer_rematch",
            ClientAction::AcceptRematch => "accept_rematch",
            ClientAction::DeclineRematch => "decline_rematch",
            ClientAction::CheckTime => "check_time",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidMove,
    InvalidBan,
    Unauthorized,
    Conflict,
    NotFound,
    BadRequest,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResult {
    Game {
        game: Game,
    },
    Moved {
        game: Game,
        record: MoveRecord,
    },
    Banned {
        game: Game,
        record: BanRecord,
    },
    Moves {
        moves: Vec<MoveRecord>,
    },
    LegalMoves {
        moves: LegalMoveMap,
    },
    Ack,
    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl ActionResult {
    pub fn error(category: ErrorCategory, message: impl Into<String>) -> Self {
        ActionResult::Error {
            category,
            message: message.into(),
        }
    }

    pub fn game(&self) -> Option<&Game> {
        match self {
            ActionResult::Game { game }
            | ActionResult::Moved { game, .. }
            | ActionResult::Banned { game, .. } => Some(game),
            _ => None,
        }
    }
}

/// A message pushed by the server to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        request_id: String,
        result: ActionResult,
    },
    Event {
        event: GameEvent,
    },
    /// Answer to a raw `ping` frame.
    Pong {
        timestamp: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_make_move_request() {
        let json = r#"{"action":"make_move","request_id":"r-1","game_id":"g-1","from":"e2","to":"e4"}"#;

        let request: ClientRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.request_id, "r-1");
        assert_eq!(request.game_id, "g-1");
        assert_eq!(
            request.action,
            ClientAction::MakeMove {
                from: "e2".to_string(),
                to: "e4".to_string(),
                promotion: None,
            }
        );
        assert_eq!(request.action.name(), "make_move");
    }

    #[test]
    fn test_parse_unit_action() {
        let json = r#"{"action":"resign","request_id":"r-2","game_id":"g-1"}"#;

        let request: ClientRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.action, ClientAction::Resign);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let json = r#"{"action":"teleport","request_id":"r-3","game_id":"g-1"}"#;

        assert!(serde_json::from_str::<ClientRequest>(json).is_err());
    }

    #[test]
    fn test_ban_request_requires_squares() {
        let json = r#"{"action":"ban_move","request_id":"r-4","game_id":"g-1","from":"e2"}"#;

        assert!(serde_json::from_str::<ClientRequest>(json).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let message = ServerMessage::Response {
            request_id: "r-5".to_string(),
            result: ActionResult::error(ErrorCategory::InvalidBan, "not a legal move"),
        };

        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["action"], "response");
        assert_eq!(json["result"]["kind"], "error");
        assert_eq!(json["result"]["category"], "invalid_ban");
    }

    #[test]
    fn test_pong_is_a_tagged_server_message() {
        let json = r#"{"action":"pong","timestamp":"2024-01-01T00:00:00+00:00"}"#;

        let message: ServerMessage = serde_json::from_str(json).unwrap();

        assert_eq!(
            message,
            ServerMessage::Pong {
                timestamp: "2024-01-01T00:00:00+00:00".to_string()
            }
        );
    }
}
