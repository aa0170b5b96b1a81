//! API Error Handling
//!
//! Structured error responses with HTTP status codes, stable reason codes and request tracking.

use crate::errors::{GameError, LedgerError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Reason code (GAME_NOT_FOUND, INVALID_STATE, NUMBER_NOT_DRAWN, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
    /// Overrides the default code of `kind`
    pub code: Option<&'static str>,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    fn new(request_id: String, kind: ApiErrorKind) -> Self {
        Self {
            kind,
            request_id,
            code: None,
        }
    }

    pub fn not_found(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::NotFound(message))
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::BadRequest(message))
    }

    pub fn conflict(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::Conflict(message))
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::InternalError(message))
    }

    pub fn service_unavailable(request_id: String, message: String) -> Self {
        Self::new(request_id, ApiErrorKind::ServiceUnavailable(message))
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Map a hall error onto an HTTP status, keeping its reason code
    pub fn from_game(request_id: String, error: GameError) -> Self {
        let message = error.to_string();
        let code = error.code();
        let api = match &error {
            GameError::NotFound { .. } => Self::not_found(request_id, message),
            GameError::InvalidState { .. }
            | GameError::DuplicateNumber { .. }
            | GameError::ExhaustedPool { .. } => Self::conflict(request_id, message),
            GameError::InvalidClaim(_) | GameError::InvalidCard(_) | GameError::NumberOutOfRange { .. } => {
                Self::bad_request(request_id, message)
            }
            GameError::ServiceUnavailable { .. } => Self::service_unavailable(request_id, message),
            GameError::Ledger(LedgerError::InsufficientFunds { .. }) => {
                return Self::bad_request(request_id, message).with_code("INSUFFICIENT_FUNDS");
            }
            GameError::Ledger(LedgerError::Unavailable(_)) => {
                return Self::service_unavailable(request_id, message).with_code("SERVICE_UNAVAILABLE");
            }
            GameError::Allocation(_) | GameError::Storage(_) | GameError::Ledger(_) => {
                Self::internal_error(request_id, message)
            }
        };
        api.with_code(code)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Conflict(msg) => write!(f, "[{}] Conflict: {}", self.request_id, msg),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
            ApiErrorKind::ServiceUnavailable(msg) => write!(f, "[{}] Service Unavailable: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, default_code, message) = match self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiErrorKind::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiErrorKind::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiErrorKind::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: self.code.unwrap_or(default_code).to_string(),
                message,
                details: None,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InvalidClaim;
    use crate::games::types::{GameId, GameStatus};

    #[test]
    fn test_game_errors_keep_reason_codes() {
        let err = ApiError::from_game("req".into(), GameError::NotFound { game_id: GameId(4) });
        assert!(matches!(err.kind, ApiErrorKind::NotFound(_)));
        assert_eq!(err.code, Some("GAME_NOT_FOUND"));

        let err = ApiError::from_game(
            "req".into(),
            GameError::InvalidState {
                game_id: GameId(1),
                status: GameStatus::Completed,
                operation: "start",
            },
        );
        assert!(matches!(err.kind, ApiErrorKind::Conflict(_)));
        assert_eq!(err.code, Some("INVALID_STATE"));

        let err = ApiError::from_game("req".into(), InvalidClaim::NumberNotDrawn { number: 7 }.into());
        assert!(matches!(err.kind, ApiErrorKind::BadRequest(_)));
        assert_eq!(err.code, Some("NUMBER_NOT_DRAWN"));
    }

    #[test]
    fn test_unavailable_ledger_maps_to_503() {
        let err = ApiError::from_game("req".into(), LedgerError::Unavailable("down".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
