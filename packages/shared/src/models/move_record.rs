use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::game::{BannedMove, Color};

/// One played half-move, as stored in the moves table (partition `game_id`,
/// sort key `ply`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveRecord {
    pub game_id: String,
    pub ply: u32,
    pub move_number: u32,
    pub color: Color,
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
    pub san: String,
    pub fen_after: String,
    pub banned_from: Option<String>,
    pub banned_to: Option<String>,
    pub banned_by: Option<Color>,
    pub time_taken_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl MoveRecord {
    /// The ban that was in force when this move was played.
    pub fn banned_move(&self) -> Option<BannedMove> {
        match (&self.banned_from, &self.banned_to) {
            (Some(from), Some(to)) => Some(BannedMove::new(from, to)),
            _ => None,
        }
    }

    pub fn is_same_move(&self, from: &str, to: &str, promotion: Option<&str>) -> bool {
        self.from == from && self.to == to && self.promotion.as_deref() == promotion
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanRecord {
    pub game_id: String,
    /// Ply of the move this ban restricts.
    pub ply: u32,
    pub move_number: u32,
    pub color: Color,
    pub from: String,
    pub to: String,
    pub created_at: DateTime<Utc>,
}

impl BanRecord {
    pub fn banned_move(&self) -> BannedMove {
        BannedMove::new(&self.from, &self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MoveRecord {
        MoveRecord {
            game_id: "game-1".to_string(),
            ply: 1,
            move_number: 1,
            color: Color::White,
            from: "d2".to_string(),
            to: "d4".to_string(),
            promotion: None,
            san: "d4".to_string(),
            fen_after: "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1"
                .to_string(),
            banned_from: Some("e2".to_string()),
            banned_to: Some("e4".to_string()),
            banned_by: Some(Color::Black),
            time_taken_ms: 1_200,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_banned_move_of_record() {
        assert_eq!(record().banned_move(), Some(BannedMove::new("e2", "e4")));

        let mut unbanned = record();
        unbanned.banned_to = None;
        assert_eq!(unbanned.banned_move(), None);
    }

    #[test]
    fn test_is_same_move() {
        let record = record();

        assert!(record.is_same_move("d2", "d4", None));
        assert!(!record.is_same_move("d2", "d3", None));
        assert!(!record.is_same_move("d2", "d4", Some("q")));
    }

    #[test]
    fn test_record_serialization() {
        let record = record();

        let serialized = serde_json::to_string(&record).unwrap();
        assert!(serialized.contains("\"banned_by\":\"black\""));

        let deserialized: MoveRecord = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, record);
    }
}
