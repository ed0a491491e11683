use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use matchfeed_core::ValidationError;
use matchfeed_store::StoreError;
use serde::Serialize;

/// JSON error body: `{message, details?}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Errors surfaced to REST callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: Some(serde_json::json!({ "reason": detail.into() })),
        }
    }

    /// A request body or query that failed validation.
    pub fn invalid(message: impl Into<String>, err: &ValidationError) -> Self {
        let details = match err.field_name() {
            Some(field) => serde_json::json!({ "field": field, "reason": err.to_string() }),
            None => serde_json::json!({ "reason": err.to_string() }),
        };
        Self::BadRequest {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            StoreError::Conflict(what) => Self::Conflict(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest { message, details } => ErrorBody { message, details },
            Self::NotFound(message) | Self::Conflict(message) => ErrorBody {
                message,
                details: None,
            },
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                ErrorBody {
                    message: "Internal server error".into(),
                    details: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
