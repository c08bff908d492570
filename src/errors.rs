use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Broker unavailable: {0}")]
    BadGateway(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => AppError::BadRequest(msg),
            e @ DomainError::NotFound(_) => AppError::NotFound(e.to_string()),
            DomainError::Storage(msg) => AppError::Internal(msg),
            DomainError::Broker(msg) => AppError::BadGateway(msg),
            DomainError::Timeout(msg) => AppError::Timeout(msg),
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Storage details stay in the log.
        let message = match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    fn status_of(e: DomainError) -> StatusCode {
        AppError::from(e).error_response().status()
    }

    #[test]
    fn domain_errors_map_to_http_statuses() {
        assert_eq!(status_of(DomainError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(DomainError::NotFound("order 1".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(DomainError::Storage("db".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(DomainError::Broker("kafka".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(DomainError::Timeout("slow".into())), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn not_found_display_names_the_entity() {
        let app_err: AppError = DomainError::NotFound("order 42".into()).into();
        assert_eq!(app_err.to_string(), "order 42 not found");
    }

    #[test]
    fn validation_message_is_passed_through() {
        let app_err: AppError = DomainError::Validation("user_id is required".into()).into();
        assert_eq!(app_err.to_string(), "user_id is required");
    }

    #[test]
    fn internal_error_display() {
        assert_eq!(
            AppError::Internal("msg".to_string()).to_string(),
            "Internal error: msg"
        );
    }
}
