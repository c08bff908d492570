pub mod delivery_repo;
pub mod kafka;
pub mod memory;
pub mod models;
pub mod order_repo;
pub mod outbox_repo;
pub mod payment_repo;

#[cfg(test)]
pub(crate) mod test_support;

use crate::domain::errors::DomainError;

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<diesel::result::Error> for DomainError {
    fn from(e: diesel::result::Error) -> Self {
        DomainError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Storage(format!("connection pool: {e}"))
    }
}
