use std::time::{Duration, Instant};

use super::errors::DomainError;

/// Point in time after which a write must not commit.
///
/// Repositories check it as the last step of a write transaction, so a
/// request that has already been answered with a timeout leaves no trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No limit; used by broker-driven writes.
    pub const NONE: Deadline = Deadline(None);

    pub fn after(budget: Duration) -> Self {
        Deadline(Instant::now().checked_add(budget))
    }

    pub fn has_passed(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), DomainError> {
        if self.has_passed() {
            Err(DomainError::Timeout("request deadline passed before commit".to_string()))
        } else {
            Ok(())
        }
    }
}
