use std::fmt;

use crate::services::errors::chess_service_errors::ChessServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanProtocolError {
    UnauthorizedAction(String),
    InvalidMove(String),
    InvalidBan(String),
    InvalidPosition(String),
}

impl fmt::Display for BanProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BanProtocolError::UnauthorizedAction(msg) => write!(f, "Unauthorized action: {}", msg),
            BanProtocolError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            BanProtocolError::InvalidBan(msg) => write!(f, "Invalid ban: {}", msg),
            BanProtocolError::InvalidPosition(msg) => write!(f, "Invalid position: {}", msg),
        }
    }
}

impl std::error::Error for BanProtocolError {}

impl From<ChessServiceError> for BanProtocolError {
    fn from(err: ChessServiceError) -> Self {
        match err {
            ChessServiceError::InvalidMove(msg) => BanProtocolError::InvalidMove(msg),
            ChessServiceError::InvalidBan(msg) => BanProtocolError::InvalidBan(msg),
            ChessServiceError::InvalidPosition(msg) | ChessServiceError::InvalidMoveText(msg) => {
                BanProtocolError::InvalidPosition(msg)
            }
        }
    }
}
