//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use integrations::IntegrationError;
use store::StoreError;

/// A workflow definition that must not be registered or run.
///
/// Raised synchronously by registration; a run that hits one records a
/// `ValidationError` execution instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The stored definition could not be decoded into a `Workflow`.
    #[error("malformed workflow definition: {0}")]
    Malformed(String),

    #[error("workflow must contain at least one action")]
    EmptyWorkflow,

    /// Two or more actions share the same ID (nested actions included).
    #[error("duplicate action ID: '{0}'")]
    DuplicateActionId(String),

    /// Two or more actions declare the same output binding.
    #[error("duplicate output binding: '{0}'")]
    DuplicateBinding(String),

    #[error("action '{action_id}' declares reserved binding name '{binding}'")]
    ReservedBinding { action_id: String, binding: String },

    /// A reference to a binding that no earlier action produces.
    #[error("action '{action_id}' references undefined binding '{binding}'")]
    UndefinedBinding { action_id: String, binding: String },

    #[error("invalid action '{action_id}': {message}")]
    InvalidAction { action_id: String, message: String },

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("loop '{action_id}' has {declared} iterations, exceeding the limit of {limit}")]
    LoopLimitExceeded {
        action_id: String,
        declared: usize,
        limit: usize,
    },
}

/// A `greater_than` / `less_than` comparison whose operands are not numeric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot compare field '{field}' with {op}: '{left}' vs '{right}' are not both numeric")]
pub struct ConditionError {
    pub field: String,
    pub op: &'static str,
    pub left: String,
    pub right: String,
}

/// A `{{ path }}` reference in action params that resolves to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved reference '{0}'")]
pub struct UnresolvedReference(pub String);

/// Errors produced by the workflow engine.
///
/// Execution-time failures are recorded in the `ExecutionRecord`; only
/// registration, lookup, and lifecycle problems surface as `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    /// An action with `Abort` policy failed and halted its run.
    #[error("execution aborted at action '{action_id}': {message}")]
    Aborted { action_id: String, message: String },

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// Persistence error from the store crate.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
