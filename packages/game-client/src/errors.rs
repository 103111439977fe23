use std::fmt;

use shared::models::actions::ErrorCategory;
use shared::services::errors::ban_protocol_errors::BanProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connection(String),
    /// The connection went away before a response arrived.
    Closed,
    Serialization(String),
    UnexpectedResponse(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TransportError::Closed => write!(f, "Connection closed"),
            TransportError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            TransportError::UnexpectedResponse(msg) => write!(f, "Unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors surfaced to the caller of a client operation. Server rejections
/// keep their category; everything else is local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    InvalidMove(String),
    InvalidBan(String),
    UnauthorizedAction(String),
    Conflict(String),
    NotFound(String),
    BadRequest(String),
    Server(String),
    Transport(TransportError),
    /// Another move or ban from this client is still awaiting its response.
    ActionInFlight,
    NoOpenGame,
}

impl SyncError {
    pub fn from_category(category: ErrorCategory, message: String) -> Self {
        match category {
            ErrorCategory::InvalidMove => SyncError::InvalidMove(message),
            ErrorCategory::InvalidBan => SyncError::InvalidBan(message),
            ErrorCategory::Unauthorized => SyncError::UnauthorizedAction(message),
            ErrorCategory::Conflict => SyncError::Conflict(message),
            ErrorCategory::NotFound => SyncError::NotFound(message),
            ErrorCategory::BadRequest => SyncError::BadRequest(message),
            ErrorCategory::Internal => SyncError::Server(message),
        }
    }

    /// Whether the local view must be refreshed from the server after this
    /// error, rather than just reverted.
    pub fn requires_refresh(&self) -> bool {
        matches!(
            self,
            SyncError::UnauthorizedAction(_) | SyncError::Conflict(_) | SyncError::Transport(_)
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            SyncError::InvalidBan(msg) => write!(f, "Invalid ban: {}", msg),
            SyncError::UnauthorizedAction(msg) => write!(f, "Unauthorized action: {}", msg),
            SyncError::Conflict(msg) => write!(f, "Game state changed, please retry: {}", msg),
            SyncError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SyncError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            SyncError::Server(msg) => write!(f, "Server error: {}", msg),
            SyncError::Transport(err) => write!(f, "Transport error: {}", err),
            SyncError::ActionInFlight => write!(f, "An action is already awaiting confirmation"),
            SyncError::NoOpenGame => write!(f, "No game is open"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::Transport(err)
    }
}

impl From<BanProtocolError> for SyncError {
    fn from(err: BanProtocolError) -> Self {
        match err {
            BanProtocolError::UnauthorizedAction(msg) => SyncError::UnauthorizedAction(msg),
            BanProtocolError::InvalidMove(msg) => SyncError::InvalidMove(msg),
            BanProtocolError::InvalidBan(msg) => SyncError::InvalidBan(msg),
            BanProtocolError::InvalidPosition(msg) => SyncError::Server(msg),
        }
    }
}
