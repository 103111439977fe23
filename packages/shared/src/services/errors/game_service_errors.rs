use crate::models::actions::ErrorCategory;
use crate::repositories::errors::game_repository_errors::GameRepositoryError;
use crate::services::errors::ban_protocol_errors::BanProtocolError;
use crate::services::errors::chess_service_errors::ChessServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameServiceError {
    InvalidMove(String),
    InvalidBan(String),
    UnauthorizedAction(String),
    /// The game changed between read and write; the action was not applied.
    Conflict(String),
    NotFound(String),
    InvalidPosition(String),
    ValidationError(String),
    RepositoryError(GameRepositoryError),
}

impl GameServiceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GameServiceError::InvalidMove(_) => ErrorCategory::InvalidMove,
            GameServiceError::InvalidBan(_) => ErrorCategory::InvalidBan,
            GameServiceError::UnauthorizedAction(_) => ErrorCategory::Unauthorized,
            GameServiceError::Conflict(_) => ErrorCategory::Conflict,
            GameServiceError::NotFound(_) => ErrorCategory::NotFound,
            GameServiceError::ValidationError(_) => ErrorCategory::BadRequest,
            GameServiceError::InvalidPosition(_) | GameServiceError::RepositoryError(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl std::fmt::Display for GameServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameServiceError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            GameServiceError::InvalidBan(msg) => write!(f, "Invalid ban: {}", msg),
            GameServiceError::UnauthorizedAction(msg) => {
                write!(f, "Unauthorized action: {}", msg)
            }
            GameServiceError::Conflict(msg) => write!(f, "Game state changed: {}", msg),
            GameServiceError::NotFound(id) => write!(f, "Game not found: {}", id),
            GameServiceError::InvalidPosition(msg) => write!(f, "Invalid position: {}", msg),
            GameServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            GameServiceError::RepositoryError(err) => write!(f, "Repository error: {}", err),
        }
    }
}

impl std::error::Error for GameServiceError {}

impl From<GameRepositoryError> for GameServiceError {
    fn from(err: GameRepositoryError) -> Self {
        match err {
            GameRepositoryError::ConditionFailed(msg) => GameServiceError::Conflict(msg),
            GameRepositoryError::NotFound(id) => GameServiceError::NotFound(id),
            other => GameServiceError::RepositoryError(other),
        }
    }
}

impl From<BanProtocolError> for GameServiceError {
    fn from(err: BanProtocolError) -> Self {
        match err {
            BanProtocolError::UnauthorizedAction(msg) => GameServiceError::UnauthorizedAction(msg),
            BanProtocolError::InvalidMove(msg) => GameServiceError::InvalidMove(msg),
            BanProtocolError::InvalidBan(msg) => GameServiceError::InvalidBan(msg),
            BanProtocolError::InvalidPosition(msg) => GameServiceError::InvalidPosition(msg),
        }
    }
}

impl From<ChessServiceError> for GameServiceError {
    fn from(err: ChessServiceError) -> Self {
        BanProtocolError::from(err).into()
    }
}
