//! `engine` crate: workflow data model, validation, condition evaluation,
//! the execution engine, its bounded execution log, and the cron scheduler.

pub mod bindings;
pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod log;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod validate;

pub use condition::{evaluate, Operator, Predicate};
pub use config::{EngineConfig, SchedulerConfig};
pub use error::{ConditionError, EngineError, ValidationError};
pub use executor::WorkflowEngine;
pub use log::{ExecutionLog, EXECUTION_LOG_CAPACITY};
pub use models::{
    Action, ActionKind, ActionOutcome, ActionStatus, Backoff, ErrorPolicy, ExecutionReason,
    ExecutionRecord, ExecutionStatus, FailureMode, Trigger, Workflow, WorkflowTemplate,
};
pub use scheduler::WorkflowScheduler;
pub use validate::validate_workflow;

#[cfg(test)]
mod executor_tests;
