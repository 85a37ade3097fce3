use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::payload_or_empty;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TriggersAccepted {
    pub execution_ids: Vec<Uuid>,
}

/// Fan the request body out to every workflow listening on `path`.
pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> ApiResult<(StatusCode, Json<TriggersAccepted>)> {
    let payload = payload_or_empty(body.map(|Json(v)| v));
    let execution_ids = state.engine.handle_webhook(&path, payload).await?;

    if execution_ids.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no workflow listens on webhook path '{path}'"
        )));
    }
    Ok((StatusCode::ACCEPTED, Json(TriggersAccepted { execution_ids })))
}
