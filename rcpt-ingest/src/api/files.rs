//! File record endpoints: validate, process, list

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rcpt_common::db::{FileRecord, ReceiptRecord};
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub message: String,
    pub file_id: i64,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub message: String,
    pub receipt_id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub extracted_data: ReceiptRecord,
}

/// POST /api/validate/:file_id
///
/// 400 with `isValid: false` when the file is missing from its stored path.
pub async fn validate_file(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ValidateResponse>)> {
    let outcome = state.lifecycle.validate(file_id).await?;

    let (status, message) = if outcome.is_valid {
        (StatusCode::OK, "File validated successfully.")
    } else {
        (StatusCode::BAD_REQUEST, "File validation failed.")
    };

    Ok((
        status,
        Json(ValidateResponse {
            message: message.to_string(),
            file_id: outcome.file_id,
            is_valid: outcome.is_valid,
            invalid_reason: outcome.invalid_reason,
        }),
    ))
}

/// POST /api/process/:file_id
///
/// 201 when the receipt was created, 200 when an existing one was updated.
pub async fn process_file(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ProcessResponse>)> {
    let outcome = state.lifecycle.process(file_id).await?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, "Receipt processed and saved.")
    } else {
        (StatusCode::OK, "Receipt re-processed and updated.")
    };

    Ok((
        status,
        Json(ProcessResponse {
            message: message.to_string(),
            receipt_id: outcome.receipt.id,
            file_id: outcome.file_id,
            file_path: outcome.final_path.to_string_lossy().into_owned(),
            extracted_data: outcome.receipt,
        }),
    ))
}

/// GET /api/files
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<Vec<FileRecord>>> {
    Ok(Json(state.lifecycle.list_files().await?))
}

/// Build file routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/api/validate/:file_id", post(validate_file))
        .route("/api/process/:file_id", post(process_file))
        .route("/api/files", get(list_files))
}
