use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::api::{AppState, Caller};
use crate::error::AppResult;
use crate::ledger::BankAccount;
use crate::middleware::error::success_response;

#[derive(Debug, Deserialize)]
pub struct FundWalletRequest {
    pub amount: Decimal,
    pub email: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectWithdrawalRequest {
    pub reason: String,
}

/// GET /api/wallet
pub async fn get_wallet(State(state): State<AppState>, caller: Caller) -> AppResult<impl IntoResponse> {
    let summary = state
        .engine
        .wallet_summary(caller.user_id)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(summary))
}

/// GET /api/wallet/transactions/{reference}
pub async fn get_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let transaction = state
        .engine
        .transaction(caller.user_id, &reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(transaction))
}

/// GET /api/wallet/events
///
/// Server-sent stream of the caller's ledger events.
pub async fn wallet_events(
    State(state): State<AppState>,
    caller: Caller,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let user_id = caller.user_id;
    info!(user_id = %user_id, "Wallet event stream opened");

    let events = stream::unfold(state.events.subscribe(), move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.user_id == user_id => {
                    let frame = Event::default()
                        .event("ledger")
                        .id(event.reference.clone())
                        .json_data(&event);
                    return Some((frame, rx));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "wallet event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// POST /api/wallet/fund
pub async fn fund_wallet(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<FundWalletRequest>,
) -> AppResult<impl IntoResponse> {
    info!(user_id = %caller.user_id, amount = %request.amount, "Wallet funding requested");
    let initialized = state
        .engine
        .initialize_wallet_funding(
            caller.user_id,
            &request.email,
            request.amount,
            request.callback_url,
        )
        .await
        .map_err(|e| caller.fail(e))?;

    Ok(success_response(serde_json::json!({
        "reference": initialized.payment.reference,
        "authorization_url": initialized.redirect_url,
        "access_code": initialized.access_code,
        "payment": initialized.payment,
    })))
}

/// POST /api/wallet/withdrawals
pub async fn request_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<WithdrawalRequest>,
) -> AppResult<impl IntoResponse> {
    info!(user_id = %caller.user_id, amount = %request.amount, "Withdrawal requested");
    let withdrawal = state
        .engine
        .request_withdrawal(
            caller.user_id,
            request.amount,
            BankAccount {
                account_name: request.account_name,
                account_number: request.account_number,
                bank_code: request.bank_code,
            },
        )
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(withdrawal))
}

/// GET /api/wallet/withdrawals/{reference}
pub async fn get_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let withdrawal = state
        .engine
        .withdrawal(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(withdrawal))
}

/// POST /api/wallet/withdrawals/{reference}/approve
pub async fn approve_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    info!(actor = %caller.user_id, reference = %reference, "Withdrawal approval requested");
    let withdrawal = state
        .engine
        .approve_withdrawal(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(withdrawal))
}

/// POST /api/wallet/withdrawals/{reference}/reject
pub async fn reject_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
    Json(request): Json<RejectWithdrawalRequest>,
) -> AppResult<impl IntoResponse> {
    info!(actor = %caller.user_id, reference = %reference, "Withdrawal rejection requested");
    let withdrawal = state
        .engine
        .reject_withdrawal(&reference, &request.reason)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(withdrawal))
}

/// POST /api/wallet/withdrawals/{reference}/verify
pub async fn verify_withdrawal(
    State(state): State<AppState>,
    caller: Caller,
    Path(reference): Path<String>,
) -> AppResult<impl IntoResponse> {
    let withdrawal = state
        .engine
        .verify_withdrawal(&reference)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(withdrawal))
}
