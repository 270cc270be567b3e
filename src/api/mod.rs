//! HTTP surface of the escrow service.
//!
//! Caller identity comes from the `x-user-id` header set by the upstream auth
//! layer; this service never authenticates end users itself.

pub mod admin;
pub mod payments;
pub mod wallet;
pub mod webhooks;

use crate::error::AppError;
use crate::escrow::{EscrowEngine, EscrowError};
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_id_from_headers, UuidRequestId};
use crate::services::notification::BroadcastSink;
use crate::services::webhook_processor::WebhookProcessor;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EscrowEngine>,
    pub webhook_processor: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
    /// Source for `/api/wallet/events`; the engine's notifier feeds it.
    pub events: BroadcastSink,
}

/// Authenticated caller plus the request id used to tag errors.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub request_id: Option<String>,
}

impl Caller {
    /// Converts an engine error into a response tagged with this request.
    pub fn fail(&self, err: EscrowError) -> AppError {
        tag(AppError::from(err), &self.request_id)
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = request_id_from_headers(&parts.headers);
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| tag(AppError::unauthorized("Missing x-user-id header"), &request_id))?;
        let user_id = Uuid::parse_str(user_id.trim()).map_err(|_| {
            tag(
                AppError::unauthorized("x-user-id header must be a UUID"),
                &request_id,
            )
        })?;
        Ok(Caller {
            user_id,
            request_id,
        })
    }
}

fn tag(err: AppError, request_id: &Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/webhooks/paystack", post(webhooks::handle_paystack_webhook))
        .route("/api/payments/initialize", post(payments::initialize_payment))
        .route("/api/payments/wallet-pay", post(payments::pay_with_wallet))
        .route(
            "/api/payments/verify/{reference}",
            get(payments::verify_payment),
        )
        .route("/api/payments/{reference}", get(payments::get_payment))
        .route(
            "/api/payments/{reference}/release",
            post(payments::release_payment),
        )
        .route(
            "/api/payments/{reference}/refund",
            post(payments::refund_payment),
        )
        .route(
            "/api/payments/{reference}/resync",
            post(payments::resync_payment),
        )
        .route("/api/wallet", get(wallet::get_wallet))
        .route("/api/wallet/fund", post(wallet::fund_wallet))
        .route("/api/wallet/events", get(wallet::wallet_events))
        .route(
            "/api/wallet/transactions/{reference}",
            get(wallet::get_transaction),
        )
        .route("/api/wallet/withdrawals", post(wallet::request_withdrawal))
        .route(
            "/api/wallet/withdrawals/{reference}",
            get(wallet::get_withdrawal),
        )
        .route(
            "/api/wallet/withdrawals/{reference}/approve",
            post(wallet::approve_withdrawal),
        )
        .route(
            "/api/wallet/withdrawals/{reference}/reject",
            post(wallet::reject_withdrawal),
        )
        .route(
            "/api/wallet/withdrawals/{reference}/verify",
            post(wallet::verify_withdrawal),
        )
        .route("/api/admin/adjustments", post(admin::post_adjustment))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

async fn liveness() -> &'static str {
    "OK"
}
