use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct IntegrationSummary {
    pub service: String,
    pub registered_at: DateTime<Utc>,
}

/// Registered services, sorted by name. Credentials are never exposed.
pub async fn list(State(state): State<AppState>) -> Json<Vec<IntegrationSummary>> {
    let registry = state.engine.registry();
    let summaries = registry
        .list()
        .into_iter()
        .filter_map(|service| registry.resolve(&service).ok())
        .map(|resolved| IntegrationSummary {
            service: resolved.service().to_owned(),
            registered_at: resolved.registered_at(),
        })
        .collect();
    Json(summaries)
}
