#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameRepositoryError {
    NotFound(String),
    /// The stored version no longer matches the one the write was based on.
    ConditionFailed(String),
    Serialization(String),
    DynamoDb(String),
}

impl std::fmt::Display for GameRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameRepositoryError::NotFound(id) => write!(f, "Game not found: {}", id),
            GameRepositoryError::ConditionFailed(msg) => {
                write!(f, "Conditional write failed: {}", msg)
            }
            GameRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            GameRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for GameRepositoryError {}
