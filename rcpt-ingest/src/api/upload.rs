//! Upload endpoint
//!
//! POST /api/upload (multipart/form-data)

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Form field the browser client uses for the PDF
pub const UPLOAD_FIELD: &str = "receiptPdf";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_id: i64,
    pub file_name: String,
    pub file_path: String,
}

struct UploadedPart {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// POST /api/upload
///
/// Takes the `receiptPdf` field, or failing that the first field carrying a
/// file name. 201 for a new record, 200 when an existing record with the same
/// name was reset.
pub async fn upload_receipt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut upload: Option<UploadedPart> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let preferred = field.name() == Some(UPLOAD_FIELD);
        if upload.is_some() && !preferred {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
            .to_vec();
        debug!(file_name = %file_name, bytes = bytes.len(), "Received upload field");

        upload = Some(UploadedPart {
            file_name,
            content_type,
            bytes,
        });
        if preferred {
            break;
        }
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded.".to_string()))?;

    let outcome = state
        .lifecycle
        .upload(
            &upload.bytes,
            &upload.file_name,
            upload.content_type.as_deref(),
        )
        .await?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, "File uploaded successfully.")
    } else {
        (
            StatusCode::OK,
            "File re-uploaded; existing record reset for validation.",
        )
    };

    Ok((
        status,
        Json(UploadResponse {
            message: message.to_string(),
            file_id: outcome.file_id,
            file_name: outcome.file_name,
            file_path: outcome.file_path.to_string_lossy().into_owned(),
        }),
    ))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/upload", post(upload_receipt))
}
