//! The `AdapterCapability` trait: the contract every service adapter must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{IntegrationCredentials, IntegrationError};

/// What an action does.
///
/// Adapters only ever receive the service kinds; `Loop` and `Conditional` are
/// control flow handled by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ApiCall,
    Webhook,
    Email,
    Notification,
    DataTransform,
    Loop,
    Conditional,
}

impl ActionKind {
    /// `true` for kinds that are dispatched to an adapter.
    pub fn is_service_call(self) -> bool {
        !matches!(self, Self::Loop | Self::Conditional)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::Notification => "notification",
            Self::DataTransform => "data_transform",
            Self::Loop => "loop",
            Self::Conditional => "conditional",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call context handed to an adapter alongside its params.
///
/// Defined here (in the integrations crate) so both the engine and individual
/// adapters can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// ID of the workflow being run.
    pub workflow_id: Uuid,
    /// ID of the current execution.
    pub execution_id: Uuid,
    /// ID of the action issuing the call.
    pub action_id: String,
    /// 1-based attempt number within the action's retry group.
    pub attempt: u32,
    /// Credentials registered for the target service.
    pub credentials: IntegrationCredentials,
}

/// The capability set of one external service.
#[async_trait]
pub trait AdapterCapability: Send + Sync {
    /// Verify the credentials against the remote service.
    async fn authenticate(&self, credentials: &IntegrationCredentials)
        -> Result<(), IntegrationError>;

    /// Cheap reachability probe.
    async fn test_connection(&self, credentials: &IntegrationCredentials) -> bool;

    /// Perform `kind` with already-rendered `params` and return the output.
    async fn execute_action(
        &self,
        kind: ActionKind,
        params: &Value,
        ctx: &ActionContext,
    ) -> Result<Value, IntegrationError>;
}
