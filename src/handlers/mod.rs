pub mod deliveries;
pub mod health;
pub mod orders;
pub mod payments;

use std::time::Duration;

use actix_web::web;

use crate::domain::deadline::Deadline;
use crate::domain::errors::DomainError;
use crate::errors::AppError;

/// Upper bound on the blocking work behind one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Duration);

impl Default for RequestDeadline {
    fn default() -> Self {
        Self(Duration::from_secs(10))
    }
}

/// Run `f` on the blocking pool, giving up with 504 once the deadline passes.
///
/// The blocking work keeps running after the 504, so `f` receives the same
/// deadline and must hand it to every write it makes; repositories refuse
/// to commit past it.
pub async fn within_deadline<T, F>(deadline: RequestDeadline, f: F) -> Result<T, AppError>
where
    F: FnOnce(Deadline) -> Result<T, DomainError> + Send + 'static,
    T: Send + 'static,
{
    let until = Deadline::after(deadline.0);
    match tokio::time::timeout(deadline.0, web::block(move || f(until))).await {
        Ok(joined) => Ok(joined.map_err(|e| AppError::Internal(e.to_string()))??),
        Err(_) => Err(AppError::Timeout(format!(
            "no result within {} ms",
            deadline.0.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn slow_work_becomes_a_timeout() {
        let deadline = RequestDeadline(Duration::from_millis(20));
        let result = within_deadline(deadline, |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[actix_web::test]
    async fn work_sees_the_request_deadline() {
        let (tx, rx) = std::sync::mpsc::channel();
        let deadline = RequestDeadline(Duration::from_millis(20));
        let result = within_deadline(deadline, move |until| {
            std::thread::sleep(Duration::from_millis(200));
            let _ = tx.send(until.check());
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));

        let late = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("blocking work finished");
        assert!(matches!(late, Err(DomainError::Timeout(_))));
    }

    #[actix_web::test]
    async fn domain_errors_pass_through() {
        let result: Result<(), AppError> = within_deadline(RequestDeadline::default(), |_| {
            Err(DomainError::NotFound("order 1".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
