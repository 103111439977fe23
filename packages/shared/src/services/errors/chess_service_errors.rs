use std::fmt;

use crate::models::pgn::MoveTextError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChessServiceError {
    InvalidMove(String),
    InvalidBan(String),
    InvalidPosition(String),
    InvalidMoveText(String),
}

impl fmt::Display for ChessServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChessServiceError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            ChessServiceError::InvalidBan(msg) => write!(f, "Invalid ban: {}", msg),
            ChessServiceError::InvalidPosition(msg) => write!(f, "Invalid position: {}", msg),
            ChessServiceError::InvalidMoveText(msg) => write!(f, "Invalid move text: {}", msg),
        }
    }
}

impl std::error::Error for ChessServiceError {}

impl From<MoveTextError> for ChessServiceError {
    fn from(err: MoveTextError) -> Self {
        ChessServiceError::InvalidMoveText(err.to_string())
    }
}
