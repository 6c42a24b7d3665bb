//! Receipt endpoints: list, fetch, delete

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use rcpt_common::db::ReceiptWithFile;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub receipt_id: i64,
}

/// GET /api/receipts
pub async fn list_receipts(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ReceiptWithFile>>> {
    Ok(Json(state.lifecycle.list_receipts().await?))
}

/// GET /api/receipts/:id
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<i64>,
) -> ApiResult<Json<ReceiptWithFile>> {
    Ok(Json(state.lifecycle.get_receipt(receipt_id).await?))
}

/// DELETE /api/receipts/:id
pub async fn delete_receipt(
    State(state): State<AppState>,
    Path(receipt_id): Path<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    let outcome = state.lifecycle.delete(receipt_id).await?;
    Ok(Json(DeleteResponse {
        message: "Receipt and associated file deleted successfully.".to_string(),
        receipt_id: outcome.receipt_id,
    }))
}

/// Build receipt routes
pub fn receipt_routes() -> Router<AppState> {
    Router::new()
        .route("/api/receipts", get(list_receipts))
        .route("/api/receipts/:id", get(get_receipt).delete(delete_receipt))
}
