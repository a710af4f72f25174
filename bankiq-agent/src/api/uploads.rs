//! Upload API handlers
//!
//! POST /uploads stores peer-metric CSV data for later local-mode analysis.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

/// POST /uploads request
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    /// CSV text with a Bank,Metric,Quarter,Value header
    pub content: String,
}

/// POST /uploads response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub filename: String,
    pub rows: usize,
}

/// POST /uploads
pub async fn upload_peer_data(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    if request.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename is empty".to_string()));
    }

    let doc = state
        .uploads
        .put_csv(&request.filename, &request.content)
        .await
        .map_err(|e| match e {
            bankiq_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            upload_id: doc.id,
            filename: doc.filename.clone(),
            rows: doc.rows.len(),
        }),
    ))
}

/// GET /uploads - stored document summaries
pub async fn list_uploads(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "uploads": state.uploads.list().await }))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/uploads", post(upload_peer_data).get(list_uploads))
}
