#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketRepositoryError {
    /// The connection no longer exists on the API Gateway side.
    Gone(String),
    DynamoDb(String),
    ApiGateway(String),
    Serialization(String),
}

impl std::fmt::Display for WebSocketRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebSocketRepositoryError::Gone(id) => write!(f, "Connection gone: {}", id),
            WebSocketRepositoryError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
            WebSocketRepositoryError::ApiGateway(msg) => write!(f, "API Gateway error: {}", msg),
            WebSocketRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
        }
    }
}

impl std::error::Error for WebSocketRepositoryError {}
