//! `api` crate: HTTP REST layer over the workflow engine.
//!
//! Exposes:
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/execute
//!   POST   /api/v1/webhook/{path}
//!   POST   /api/v1/events/{name}
//!   GET    /api/v1/executions?workflow_id=&limit=
//!   GET    /api/v1/executions/{id}
//!   GET    /api/v1/integrations
//!   GET    /api/v1/templates
//!   POST   /api/v1/templates
//!   POST   /api/v1/templates/{id}/instantiate

pub mod error;
pub mod handlers;

use std::future::Future;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use engine::WorkflowEngine;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{events, executions, integrations, templates, webhooks, workflows};

    Router::new()
        .route("/api/v1/workflows", post(workflows::create).get(workflows::list))
        .route(
            "/api/v1/workflows/:id",
            get(workflows::get).delete(workflows::delete),
        )
        .route("/api/v1/workflows/:id/execute", post(executions::execute))
        .route("/api/v1/webhook/*path", post(webhooks::handle_webhook))
        .route("/api/v1/events/:name", post(events::emit))
        .route("/api/v1/executions", get(executions::list))
        .route("/api/v1/executions/:id", get(executions::get))
        .route("/api/v1/integrations", get(integrations::list))
        .route("/api/v1/templates", get(templates::list).post(templates::create))
        .route("/api/v1/templates/:id/instantiate", post(templates::instantiate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: &str, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
