pub mod consumer;
pub mod delivery_scheduler;
pub mod delivery_service;
pub mod order_service;
pub mod outbox_relay;
pub mod payment_service;

use crate::domain::errors::DomainError;

/// Run synchronous storage work off the async executor.
pub async fn run_blocking<T, F>(f: F) -> Result<T, DomainError>
where
    F: FnOnce() -> Result<T, DomainError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DomainError::Storage(format!("blocking task failed: {e}")))?
}
