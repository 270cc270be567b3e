use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::services::webhook_processor::{log_failure, WebhookError, WebhookOutcome};

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// POST /webhooks/paystack
///
/// Answers 401 only for a bad signature. Every other outcome is acknowledged
/// with 200 so the gateway does not keep redelivering events this service
/// cannot act on.
pub async fn handle_paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(PAYSTACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.webhook_processor.process(&body, signature).await {
        Ok(WebhookOutcome::Applied {
            event_type,
            reference,
        }) => {
            info!(event_type = %event_type, reference = %reference, "Webhook processed successfully");
        }
        Ok(WebhookOutcome::Ignored { event_type, reason }) => {
            info!(event_type = %event_type, reason = %reason, "Webhook acknowledged without action");
        }
        Err(WebhookError::InvalidSignature) => {
            warn!(has_signature = signature.is_some(), "Rejected webhook with invalid signature");
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"received": false})))
                .into_response();
        }
        Err(e) => log_failure(&e, &body),
    }

    (StatusCode::OK, Json(serde_json::json!({"received": true}))).into_response()
}
