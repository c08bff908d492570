use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Downstream timeout: {0}")]
    Timeout(String),
}

impl DomainError {
    /// Whether the same call may succeed if simply attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::Storage(_) | DomainError::Broker(_) | DomainError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Validation(format!("malformed payload: {e}"))
    }
}
