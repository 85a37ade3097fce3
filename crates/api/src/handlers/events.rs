use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use super::payload_or_empty;
use super::webhooks::TriggersAccepted;
use crate::error::ApiResult;
use crate::AppState;

/// Emit a named event. Having no listeners is not an error.
pub async fn emit(
    Path(name): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> ApiResult<(StatusCode, Json<TriggersAccepted>)> {
    let payload = payload_or_empty(body.map(|Json(v)| v));
    let execution_ids = state.engine.emit_event(&name, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(TriggersAccepted { execution_ids })))
}
