//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory. They are serialised to/from the JSON `definition` of a
//! [`store::WorkflowRow`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use integrations::ActionKind;

use crate::condition::Predicate;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started. Exactly one per workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fired by the scheduler.
    Schedule {
        /// Cron expression: 5 fields, or 6/7 with seconds. Evaluated in UTC.
        expression: String,
    },
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook {
        /// URL path segment that identifies this workflow.
        path: String,
    },
    /// Triggered when a named event is emitted.
    Event { name: String },
    /// Triggered by an external poller once `predicate` holds for its source.
    Condition { predicate: Predicate },
    /// Triggered manually via the API or CLI.
    Manual,
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Event { .. } => "event",
            Self::Condition { .. } => "condition",
            Self::Manual => "manual",
        }
    }
}

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// What happens once a failure is final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    #[default]
    Abort,
    Continue,
}

/// Per-action failure handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the run; later actions are recorded `Skipped`.
    #[default]
    Abort,
    /// Record `Failed` and move on.
    Continue,
    /// Re-invoke up to `max_retries` more times, then apply `then`.
    Retry {
        max_retries: u32,
        #[serde(default)]
        backoff_ms: u64,
        #[serde(default)]
        backoff: Backoff,
        #[serde(default)]
        then: FailureMode,
    },
}

impl ErrorPolicy {
    /// Total attempts allowed, the first call included.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Retry { max_retries, .. } => max_retries.saturating_add(1),
            _ => 1,
        }
    }

    /// Whether a final failure halts the run.
    pub fn aborts_on_failure(&self) -> bool {
        match self {
            Self::Abort => true,
            Self::Continue => false,
            Self::Retry { then, .. } => *then == FailureMode::Abort,
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the first failure is `retry_delay(1)`).
    pub fn retry_delay(&self, attempt: u32, ceiling: Duration) -> Duration {
        let Self::Retry {
            backoff_ms, backoff, ..
        } = self
        else {
            return Duration::ZERO;
        };

        let ms = match backoff {
            Backoff::Fixed => *backoff_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(20);
                backoff_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms).min(ceiling)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A single step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique within the workflow, nested actions included.
    pub id: String,
    pub kind: ActionKind,
    /// Registry key of the adapter; required for service kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    /// Passed to the adapter after `{{ path }}` references are rendered.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Name under which this action's output is bound for later actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_binding: Option<String>,
    /// Skip gate for service and loop actions; branch condition for conditionals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Predicate>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Loop body, run once per element.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Action>,
    /// Conditional branch taken when the gate holds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then: Vec<Action>,
    /// Conditional branch taken otherwise.
    #[serde(default, rename = "else", skip_serializing_if = "Vec::is_empty")]
    pub otherwise: Vec<Action>,
}

impl Action {
    /// An action dispatched to `service`.
    pub fn service(id: impl Into<String>, kind: ActionKind, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            target_service: Some(service.into()),
            params: Map::new(),
            output_binding: None,
            gate: None,
            on_error: ErrorPolicy::default(),
            timeout_ms: None,
            body: Vec::new(),
            then: Vec::new(),
            otherwise: Vec::new(),
        }
    }

    /// A loop over the sequence at `items` (a binding path).
    pub fn looping(id: impl Into<String>, items: impl Into<String>, body: Vec<Action>) -> Self {
        let mut action = Self::service(id, ActionKind::Loop, "");
        action.target_service = None;
        action.params.insert("items".into(), Value::String(items.into()));
        action.body = body;
        action
    }

    pub fn conditional(
        id: impl Into<String>,
        condition: Predicate,
        then: Vec<Action>,
        otherwise: Vec<Action>,
    ) -> Self {
        let mut action = Self::service(id, ActionKind::Conditional, "");
        action.target_service = None;
        action.gate = Some(condition);
        action.then = then;
        action.otherwise = otherwise;
        action
    }

    /// Replace `params` with the entries of a JSON object; other values are ignored.
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn bind(mut self, name: impl Into<String>) -> Self {
        self.output_binding = Some(name.into());
        self
    }

    pub fn gated(mut self, gate: Predicate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

fn default_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// `false` suppresses scheduler-driven runs only.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub allow_concurrent_executions: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, trigger: Trigger, actions: Vec<Action>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: 1,
            enabled: true,
            trigger,
            actions,
            allow_concurrent_executions: false,
            created_at: Utc::now(),
        }
    }
}

/// A reusable definition that workflows are instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub workflow: Workflow,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionReason {
    Scheduled,
    Manual,
    Webhook,
    Event,
}

impl std::fmt::Display for ExecutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every action succeeded or was skipped by its gate.
    Succeeded,
    /// At least one action failed under a `Continue` policy.
    Failed,
    /// An action failed under an `Abort` policy.
    Aborted,
    /// The engine shut down mid-run.
    Cancelled,
    /// The workflow was missing or malformed; nothing ran.
    ValidationError,
    /// Suppressed: another run was in flight, or a scheduled run hit a disabled workflow.
    SchedulingSkipped,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ValidationError => write!(f, "validation_error"),
            Self::SchedulingSkipped => write!(f, "scheduling_skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// The recorded result of one action (one attempt group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub status: ActionStatus,
    pub attempts: u32,
    /// Loop index when the action ran inside a loop body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why a `Skipped` action did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub(crate) fn skipped(action_id: &str, iteration: Option<u32>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            action_id: action_id.to_owned(),
            status: ActionStatus::Skipped,
            attempts: 0,
            iteration,
            error: None,
            reason: Some(reason.into()),
            output: None,
            started_at: now,
            finished_at: now,
        }
    }
}

/// The immutable outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_version: Option<u32>,
    pub reason: ExecutionReason,
    pub status: ExecutionStatus,
    /// Set when a manual, webhook, or event request ran a disabled workflow.
    #[serde(default)]
    pub disabled_override: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trigger_payload: Value,
    /// One entry per action, in execution order.
    pub per_action_status: Vec<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// First outcome recorded for `action_id`.
    pub fn outcome(&self, action_id: &str) -> Option<&ActionOutcome> {
        self.per_action_status.iter().find(|o| o.action_id == action_id)
    }

    /// Every outcome recorded for `action_id` (one per loop iteration).
    pub fn outcomes<'a>(&'a self, action_id: &'a str) -> impl Iterator<Item = &'a ActionOutcome> + 'a {
        self.per_action_status
            .iter()
            .filter(move |o| o.action_id == action_id)
    }
}
