use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use engine::WorkflowTemplate;

use super::decode;
use super::workflows::WorkflowCreated;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InstantiateDto {
    pub name: Option<String>,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkflowTemplate>>> {
    Ok(Json(state.engine.list_templates().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<WorkflowCreated>)> {
    let template: WorkflowTemplate = decode(body)?;
    let id = state.engine.save_template(template).await?;
    Ok((StatusCode::CREATED, Json(WorkflowCreated { id })))
}

/// Stamp a new workflow from the template; the response carries the workflow id.
pub async fn instantiate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Option<Json<InstantiateDto>>,
) -> ApiResult<(StatusCode, Json<WorkflowCreated>)> {
    let name = body.and_then(|Json(dto)| dto.name);
    let workflow_id = state.engine.instantiate_template(id, name).await?;
    Ok((StatusCode::CREATED, Json(WorkflowCreated { id: workflow_id })))
}
