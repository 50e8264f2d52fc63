use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::DbError;
use crate::engine::EngineError;
use crate::idempotency::CachedResponse;

/// API error codes for client handling
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FieldRequired,
    InvalidValue,
    InvalidInput,
    StaleUpdate,
    Forbidden,
    InvalidAssignee,
    NotFound,
    Unauthorized,
    InternalError,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

/// Standard API error envelope: `{"error": {"code", "field"?, "message"}}`
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code,
                field: None,
                message: message.into(),
            },
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.error.field = Some(field.into());
        self
    }
}

/// Wrapper for API results
pub type ApiResult<T> = Result<T, AppError>;

/// Application error that converts to HTTP responses
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub body: ApiError,
}

impl AppError {
    pub fn new(status: StatusCode, body: ApiError) -> Self {
        Self { status, body }
    }

    pub fn field_required(field: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ApiError::new(ErrorCode::FieldRequired, format!("{} is required", field)).with_field(field),
        )
    }

    pub fn invalid_value(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ApiError::new(ErrorCode::InvalidValue, message).with_field(field),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ApiError::new(ErrorCode::InvalidInput, message))
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            ApiError::new(ErrorCode::NotFound, format!("{} not found", resource)),
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ApiError::new(ErrorCode::Unauthorized, message))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ApiError::new(ErrorCode::Forbidden, message))
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::new(ErrorCode::InternalError, "Internal server error"),
        )
    }

    /// Serialized form, as stored by the idempotency cache.
    pub fn to_cached(&self) -> CachedResponse {
        let body = serde_json::to_string(&self.body).unwrap_or_else(|_| {
            r#"{"error":{"code":"INTERNAL_ERROR","message":"Internal server error"}}"#.to_string()
        });
        CachedResponse {
            status_code: self.status.as_u16(),
            body,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, [(header::CONTENT_TYPE, "application/json")], self.body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FieldRequired { field } => Self::field_required(field),
            EngineError::InvalidField { field, message } => Self::invalid_value(field, message),
            EngineError::NoChanges => Self::invalid_input("No updatable fields were provided"),
            err @ EngineError::StaleUpdate { .. } => Self::new(
                StatusCode::CONFLICT,
                ApiError::new(ErrorCode::StaleUpdate, err.to_string()),
            ),
            EngineError::Forbidden(msg) => Self::forbidden(msg),
            EngineError::InvalidAssignee(msg) => Self::new(
                StatusCode::BAD_REQUEST,
                ApiError::new(ErrorCode::InvalidAssignee, msg).with_field("assignedTo"),
            ),
            EngineError::NotFound(what) => Self::not_found(&what),
            EngineError::Db(err) => Self::internal(err),
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        EngineError::from(err).into()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let err = AppError::field_required("title");
        let json = serde_json::to_value(&err.body).unwrap();
        assert_eq!(json["error"]["code"], "FIELD_REQUIRED");
        assert_eq!(json["error"]["field"], "title");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn field_omitted_when_absent() {
        let err = AppError::forbidden("nope");
        let json = serde_json::to_value(&err.body).unwrap();
        assert!(json["error"].get("field").is_none());
        assert_eq!(json["error"]["code"], "FORBIDDEN");
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::NoChanges, StatusCode::BAD_REQUEST, ErrorCode::InvalidInput),
            (
                EngineError::StaleUpdate { ticket_id: "t".to_string(), expected: 1, actual: 2 },
                StatusCode::CONFLICT,
                ErrorCode::StaleUpdate,
            ),
            (EngineError::Forbidden("x".to_string()), StatusCode::FORBIDDEN, ErrorCode::Forbidden),
            (
                EngineError::InvalidAssignee("x".to_string()),
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidAssignee,
            ),
            (EngineError::NotFound("Ticket t".to_string()), StatusCode::NOT_FOUND, ErrorCode::NotFound),
            (
                EngineError::Db(DbError::Lock("poisoned".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
            ),
        ];

        for (engine_err, status, code) in cases {
            let err = AppError::from(engine_err);
            assert_eq!(err.status, status);
            assert_eq!(err.body.error.code, code);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::from(DbError::Lock("mutex poisoned at db.rs:42".to_string()));
        assert_eq!(err.body.error.message, "Internal server error");
    }

    #[test]
    fn cached_form_round_trips_status() {
        let cached = AppError::not_found("Ticket t1").to_cached();
        assert_eq!(cached.status_code, 404);
        assert!(cached.body.contains("NOT_FOUND"));
    }
}
