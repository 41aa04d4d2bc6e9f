//! API error type and the mapping from domain errors to HTTP responses.
//!
//! Every error body has the shape `{ "ok": false, "code", "message" }`.
//! Internal failures are logged with their details and answered with a
//! generic message.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use reviewpilot_core::error::ReviewPilotError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: String,
    pub message: String,
}

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { ok: false, code: code.to_string(), message: message.into() } }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn api_forbidden(message: &str) -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<ReviewPilotError> for ApiError {
    fn from(err: ReviewPilotError) -> Self {
        use ReviewPilotError as E;
        let (status, code) = match &err {
            E::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            E::ReplyAlreadyExists => (StatusCode::BAD_REQUEST, "reply_exists"),
            E::ReplyAlreadyPosted => (StatusCode::BAD_REQUEST, "reply_posted"),
            E::ReplyMissing => (StatusCode::BAD_REQUEST, "reply_missing"),
            E::OAuthNotConnected(_) => (StatusCode::BAD_REQUEST, "oauth_not_connected"),
            E::QuotaExceeded(_) => (StatusCode::BAD_REQUEST, "quota_exceeded"),
            E::InvalidState(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
            E::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            E::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            E::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            E::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            _ => {
                tracing::error!(error = %err, "request failed");
                return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error");
            }
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        api_validation_error(&rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        api_validation_error(&rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rules_are_bad_requests() {
        for (err, code) in [
            (ReviewPilotError::ReplyAlreadyExists, "reply_exists"),
            (ReviewPilotError::ReplyAlreadyPosted, "reply_posted"),
            (ReviewPilotError::ReplyMissing, "reply_missing"),
            (ReviewPilotError::OAuthNotConnected("acme".into()), "oauth_not_connected"),
            (ReviewPilotError::QuotaExceeded("basic".into()), "quota_exceeded"),
            (ReviewPilotError::validation("empty"), "validation_error"),
        ] {
            assert!(err.is_business_rule());
            let api = ApiError::from(err);
            assert_eq!(api.status, StatusCode::BAD_REQUEST);
            assert_eq!(api.body.code, code);
            assert!(!api.body.ok);
        }
    }

    #[test]
    fn test_auth_and_lookup_errors() {
        let api = ApiError::from(ReviewPilotError::Unauthorized("bad token".into()));
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);
        let api = ApiError::from(ReviewPilotError::not_found("review"));
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert_eq!(api.body.message, "review not found");
        let api = ApiError::from(ReviewPilotError::Conflict("slug taken".into()));
        assert_eq!(api.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_integration_errors_hide_details() {
        let api = ApiError::from(ReviewPilotError::google("HTTP 500: token=secret"));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.code, "internal");
        assert!(!api.body.message.contains("secret"));
    }
}
