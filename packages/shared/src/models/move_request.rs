use serde::{Deserialize, Serialize};

use crate::models::game::BannedMove;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRequest {
    pub game_id: String,
    pub from_square: String,             // e.g., "e2"
    pub to_square: String,               // e.g., "e4"
    pub promotion_piece: Option<String>, // e.g., "q" for queen
}

impl MoveRequest {
    pub fn new(game_id: String, from_square: String, to_square: String) -> Self {
        MoveRequest {
            game_id,
            from_square,
            to_square,
            promotion_piece: None,
        }
    }

    pub fn with_promotion(
        game_id: String,
        from_square: String,
        to_square: String,
        promotion_piece: String,
    ) -> Self {
        MoveRequest {
            game_id,
            from_square,
            to_square,
            promotion_piece: Some(promotion_piece),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanRequest {
    pub game_id: String,
    pub from_square: String,
    pub to_square: String,
}

impl BanRequest {
    pub fn new(game_id: String, from_square: String, to_square: String) -> Self {
        BanRequest {
            game_id,
            from_square,
            to_square,
        }
    }

    pub fn banned_move(&self) -> BannedMove {
        BannedMove::new(&self.from_square, &self.to_square)
    }
}
