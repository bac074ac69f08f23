use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use vectorsmith_core::DomainError;
use vectorsmith_infra::pipeline::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(err) => domain_error_to_response(err),
        ServiceError::Provider(err) => json_error(StatusCode::BAD_GATEWAY, "provider_error", err.user_message()),
        ServiceError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "storage failure")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::UserNotFound => json_error(StatusCode::NOT_FOUND, "user_not_found", "user not found"),
        DomainError::InsufficientCredit => {
            json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_credit", "Insufficient credits")
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
