//! Built-in adapters that need no external service.
//!
//! - `echo` returns its rendered params, which makes it the natural target
//!   for `data_transform` actions.
//! - `log` writes the `message` param through `tracing` and returns it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{ActionContext, ActionKind, AdapterCapability, IntegrationCredentials, IntegrationError};

pub const ECHO_SERVICE: &str = "echo";
pub const LOG_SERVICE: &str = "log";

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAdapter;

#[async_trait]
impl AdapterCapability for EchoAdapter {
    async fn authenticate(&self, _credentials: &IntegrationCredentials) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn test_connection(&self, _credentials: &IntegrationCredentials) -> bool {
        true
    }

    async fn execute_action(
        &self,
        _kind: ActionKind,
        params: &Value,
        _ctx: &ActionContext,
    ) -> Result<Value, IntegrationError> {
        Ok(params.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdapter;

#[async_trait]
impl AdapterCapability for LogAdapter {
    async fn authenticate(&self, _credentials: &IntegrationCredentials) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn test_connection(&self, _credentials: &IntegrationCredentials) -> bool {
        true
    }

    async fn execute_action(
        &self,
        kind: ActionKind,
        params: &Value,
        ctx: &ActionContext,
    ) -> Result<Value, IntegrationError> {
        let message = match params.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(IntegrationError::request(
                    LOG_SERVICE,
                    "missing required param 'message'",
                ))
            }
        };

        info!(
            workflow_id = %ctx.workflow_id,
            execution_id = %ctx.execution_id,
            action_id = %ctx.action_id,
            kind = %kind,
            "{message}"
        );
        Ok(json!({ "message": message }))
    }
}
