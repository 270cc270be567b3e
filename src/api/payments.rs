use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::{AppState, Caller};
use crate::error::AppResult;
use crate::escrow::{EscrowError, InitializePayment};
use crate::ledger::PaymentTarget;
use crate::middleware::error::success_response;

#[derive(Debug, Deserialize)]
pub struct InitializePaymentRequest {
    pub booking_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub email: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WalletPayRequest {
    pub booking_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

fn payable_target(
    booking_id: Option<Uuid>,
    order_id: Option<Uuid>,
) -> Result<PaymentTarget, EscrowError> {
    Ok(PaymentTarget::from_parts(booking_id, order_id, false)?)
}

/// POST /api/payments/initialize
pub async fn initialize_payment(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<InitializePaymentRequest>,
) -> AppResult<impl IntoResponse> {
    let target =
        payable_target(request.booking_id, request.order_id).map_err(|e| caller.fail(e))?;
    info!(user_id = %caller.user_id, target = %target, "Payment initialization requested");

    let initialized = state
        .engine
        .initialize_payment(InitializePayment {
            payer_id: caller.user_id,
            payer_email: request.email,
            target,
            amount: request.amount,
            callback_url: request.callback_url,
        })
        .await
        .map_err(|e| caller.fail(e))?;

    Ok(success_response(serde_json::json!({
        "reference": initialized.payment.reference,
        "authorization_url": initialized.redirect_url,
        "access_code": initialized.access_code,
        "payment": initialized.payment,
    })))
}

/// POST /api/payments/wallet-pay
pub async fn pay_with_wallet(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<WalletPayRequest>,
) -> AppResult<impl IntoResponse> {
    let target =
        payable_target(request.booking_id, request.order_id).map_err(|e| caller.fail(e))?;
    let report = state
        .engine
        .pay_with_wallet(caller.user_id, target)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(report))
}

/// GET /api/payments/verify/{reference}
pub async fn verify_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    info!(user_id = %caller.user_id, reference = %reference, "Manual payment verification requested");
    let report = state
        .engine
        .verify_payment(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(report))
}

/// GET /api/payments/{reference}
pub async fn get_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let payment = state
        .engine
        .payment(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(payment))
}

/// POST /api/payments/{reference}/release
pub async fn release_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    info!(actor = %caller.user_id, reference = %reference, "Escrow release requested");
    let payment = state
        .engine
        .release_to_recipient(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(payment))
}

/// POST /api/payments/{reference}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
    Json(request): Json<RefundRequest>,
) -> AppResult<impl IntoResponse> {
    info!(actor = %caller.user_id, reference = %reference, "Escrow refund requested");
    let payment = state
        .engine
        .refund(&reference, &request.reason, Some(caller.user_id))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(payment))
}

/// POST /api/payments/{reference}/resync
pub async fn resync_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let payment = state
        .engine
        .resync_mirror(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(payment))
}
