#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    Serialization(String),
    Delivery(String),
}

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            BroadcastError::Delivery(msg) => write!(f, "Delivery error: {}", msg),
        }
    }
}

impl std::error::Error for BroadcastError {}
