use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

/// Markers that betray store internals. Any outgoing message containing one
/// is replaced by the code's template before it leaves the process.
const INTERNAL_MARKERS: &[&str] = &[
    "column",
    "does not exist",
    "sqlstate",
    "foreign key",
    "constraint",
    "duplicate",
    "unique",
    "connection",
    "timeout",
    "deadlock",
    "lock",
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid credentials: {0}")]
    AuthenticationFailed(String),

    #[error("scope violation: {0}")]
    AuthorizationFailed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("invalid sort: {0}")]
    InvalidSort(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("merchant {0} not found")]
    MerchantNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transient store failure, retries exhausted")]
    ServiceUnavailable { retry_after: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0} not yet implemented")]
    NotImplemented(&'static str),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ApiError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_)
            | ApiError::InvalidFilter(_)
            | ApiError::InvalidField(_)
            | ApiError::InvalidSort(_) => StatusCode::BAD_REQUEST,
            ApiError::TransactionNotFound(_) | ApiError::MerchantNotFound(_) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Stable machine-readable code. Never renamed, never reused.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            ApiError::AuthorizationFailed(_) => "AUTHORIZATION_FAILED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidFilter(_) => "INVALID_FILTER",
            ApiError::InvalidField(_) => "INVALID_FIELD",
            ApiError::InvalidSort(_) => "INVALID_SORT",
            ApiError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            ApiError::MerchantNotFound(_) => "MERCHANT_NOT_FOUND",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
            ApiError::NotImplemented(_) => "NOT_IMPLEMENTED",
        }
    }

    /// User-facing template for the code. The detailed cause stays in the
    /// structured log only.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::AuthenticationFailed(_) => {
                "Invalid or missing authentication credentials".to_string()
            }
            ApiError::AuthorizationFailed(_) => "Access denied to this merchant data".to_string(),
            ApiError::BadRequest(message) => sanitize_message(message, "Invalid request parameters"),
            ApiError::InvalidFilter(_) => "Filter expression is invalid".to_string(),
            ApiError::InvalidField(_) => "Requested field is not available".to_string(),
            ApiError::InvalidSort(_) => "Sort expression is invalid".to_string(),
            ApiError::TransactionNotFound(_) => "Transaction not found".to_string(),
            ApiError::MerchantNotFound(_) => "Merchant not found".to_string(),
            ApiError::NotFound(_) => "Resource not found".to_string(),
            ApiError::Database(_) => {
                "A database error occurred while processing the request".to_string()
            }
            ApiError::ServiceUnavailable { .. } => {
                "Service temporarily unavailable, please retry".to_string()
            }
            ApiError::Internal(_) => "An internal error occurred".to_string(),
            ApiError::NotImplemented(feature) => format!("{} not yet implemented", feature),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ApiError::ServiceUnavailable { retry_after } => Some(json!({ "retry_after": retry_after })),
            _ => None,
        }
    }

    /// True when the failure class is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Database(err) => crate::db::retry::is_retryable(err),
            ApiError::ServiceUnavailable { .. } => true,
            _ => false,
        }
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> RequestError {
        RequestError {
            error: self,
            request_id: request_id.into(),
        }
    }
}

/// An [`ApiError`] bound to the request it failed, so the error envelope can
/// echo the caller's request id.
#[derive(Debug)]
pub struct RequestError {
    pub error: ApiError,
    pub request_id: String,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let code = self.error.code();

        // The full cause is only ever visible to operators.
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, code, error = %self.error, "request failed");
        } else {
            tracing::warn!(request_id = %self.request_id, code, error = %self.error, "request rejected");
        }

        let mut body = json!({
            "code": code,
            "message": self.error.user_message(),
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": self.request_id,
        });
        if let Some(details) = self.error.details() {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = generated_request_id();
        self.with_request_id(request_id).into_response()
    }
}

/// Replaces a message with the fallback template when it carries any
/// store-internal marker.
pub fn sanitize_message(message: &str, fallback: &str) -> String {
    let lowered = message.to_lowercase();
    if INTERNAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

/// Server-generated request id of the shape `req_<unix-seconds>_<nanos>`.
pub fn generated_request_id() -> String {
    let now = Utc::now();
    format!("req_{}_{}", now.timestamp(), now.timestamp_subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::AuthenticationFailed("no header".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::AuthorizationFailed("other scope".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::InvalidFilter("amount:like".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TransactionNotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ServiceUnavailable { retry_after: 30 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::InvalidFilter("x".into()).code(), "INVALID_FILTER");
        assert_eq!(ApiError::InvalidField("x".into()).code(), "INVALID_FIELD");
        assert_eq!(ApiError::InvalidSort("x".into()).code(), "INVALID_SORT");
        assert_eq!(ApiError::Database(sqlx::Error::RowNotFound).code(), "DATABASE_ERROR");
        assert_eq!(
            ApiError::ServiceUnavailable { retry_after: 30 }.code(),
            "SERVICE_UNAVAILABLE"
        );
    }

    #[test]
    fn user_message_never_leaks_store_internals() {
        let err = ApiError::Database(sqlx::Error::ColumnNotFound(
            "column p.device_id does not exist".to_string(),
        ));
        let message = err.user_message();
        assert!(!message.to_lowercase().contains("column"));
        assert!(!message.contains("device_id"));
    }

    #[test]
    fn sanitize_replaces_marked_messages() {
        assert_eq!(
            sanitize_message("duplicate key value violates unique constraint", "fallback"),
            "fallback"
        );
        assert_eq!(sanitize_message("Invalid page parameter", "fallback"), "Invalid page parameter");
    }

    #[test]
    fn service_unavailable_carries_retry_hint() {
        let details = ApiError::ServiceUnavailable { retry_after: 30 }.details().unwrap();
        assert_eq!(details["retry_after"], 30);
    }

    #[test]
    fn generated_request_id_shape() {
        let id = generated_request_id();
        assert!(id.starts_with("req_"));
        assert_eq!(id.matches('_').count(), 2);
    }
}
