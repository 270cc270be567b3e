use axum::{extract::State, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::{AppState, Caller};
use crate::error::AppResult;
use crate::escrow::AdjustmentDirection;
use crate::middleware::error::success_response;

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: Uuid,
    pub direction: AdjustmentDirection,
    pub amount: Decimal,
    pub description: String,
}

/// POST /api/admin/adjustments
pub async fn post_adjustment(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<AdjustmentRequest>,
) -> AppResult<impl IntoResponse> {
    info!(
        actor = %caller.user_id,
        user_id = %request.user_id,
        direction = ?request.direction,
        amount = %request.amount,
        "Ledger adjustment requested"
    );
    let transaction = state
        .engine
        .post_adjustment(
            request.user_id,
            request.direction,
            request.amount,
            &request.description,
        )
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(success_response(transaction))
}
