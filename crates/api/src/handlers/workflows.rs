use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use engine::Workflow;

use super::decode;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WorkflowCreated {
    pub id: Uuid,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.engine.list_workflows().await?))
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

/// Validate and store a workflow definition. Re-posting an existing id replaces it.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<WorkflowCreated>)> {
    let workflow: Workflow = decode(body)?;
    let id = state.engine.register_workflow(workflow).await?;
    Ok((StatusCode::CREATED, Json(WorkflowCreated { id })))
}

pub async fn delete(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.engine.delete_workflow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
