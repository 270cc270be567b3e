//! JSON envelopes for API responses.
//!
//! Failures carry a stable `error` code plus whatever structured detail the
//! client needs to react: the offending field, the balance that fell short,
//! or the status that blocked a transition.

use crate::error::{AppError, AppErrorKind, DomainError, ErrorCode, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: details_for(error),
            retryable: error.is_retryable(),
        }
    }
}

fn details_for(error: &AppError) -> Option<Value> {
    let mut details = Map::new();
    match &error.kind {
        AppErrorKind::Validation(ValidationError::InvalidField { field, .. })
        | AppErrorKind::Validation(ValidationError::MissingField { field }) => {
            details.insert("field".into(), json!(field));
        }
        AppErrorKind::Domain(DomainError::InsufficientFunds {
            available,
            required,
        }) => {
            details.insert("available".into(), json!(available));
            details.insert("required".into(), json!(required));
        }
        AppErrorKind::Domain(DomainError::InvalidTransition {
            reference, current, ..
        }) => {
            details.insert("reference".into(), json!(reference));
            details.insert("current_status".into(), json!(current));
        }
        _ => {}
    }
    if let Some(context) = &error.context {
        details.insert("context".into(), json!(context));
    }
    (!details.is_empty()).then(|| Value::Object(details))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from_app_error(&self);

        if status.is_server_error() {
            tracing::error!(
                error = ?self.kind,
                code = ?body.error,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request failed"
            );
        } else {
            tracing::warn!(
                code = ?body.error,
                message = %body.message,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

/// Wraps a payload in the success envelope used by every endpoint.
pub fn success_response<T: Serialize>(data: T) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
