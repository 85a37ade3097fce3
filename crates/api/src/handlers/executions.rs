use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use engine::{ExecutionReason, ExecutionRecord};

use super::payload_or_empty;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Serialize)]
pub struct ExecutionAccepted {
    pub execution_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub workflow_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// Manual trigger. Returns as soon as the run is enqueued.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Option<Json<ExecuteWorkflowDto>>,
) -> ApiResult<(StatusCode, Json<ExecutionAccepted>)> {
    // Unknown ids are a 404 here rather than a ValidationError record.
    state.engine.get_workflow(id).await?;

    let input = body.map(|Json(dto)| dto.input);
    let execution_id = state
        .engine
        .trigger(id, payload_or_empty(input), ExecutionReason::Manual)?;
    Ok((StatusCode::ACCEPTED, Json(ExecutionAccepted { execution_id })))
}

pub async fn list(
    Query(query): Query<ExecutionQuery>,
    State(state): State<AppState>,
) -> Json<Vec<ExecutionRecord>> {
    Json(state.engine.execution_log().query(query.workflow_id, query.limit))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<ExecutionRecord>> {
    state
        .engine
        .execution_log()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("execution not found: {id}")))
}
