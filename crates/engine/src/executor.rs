//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Loads the workflow from the store and re-validates it.
//! 2. Applies the disabled and non-concurrent rules (`SchedulingSkipped`).
//! 3. Walks the action list in declaration order, evaluating gates, expanding
//!    loops and conditionals, and dispatching service actions to the adapter
//!    resolved from the `IntegrationRegistry`.
//! 4. Handles failures per action: retry with back-off, then abort or continue.
//! 5. Appends exactly one `ExecutionRecord` per run to the `ExecutionLog`.
//!
//! Runs are spawned on a `TaskTracker`; `shutdown` cancels them cooperatively.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use integrations::{ActionContext, IntegrationRegistry};
use store::{StoreError, TemplateRow, WorkflowRow, WorkflowStore};

use crate::bindings::Bindings;
use crate::condition::{evaluate, FieldResolver};
use crate::config::EngineConfig;
use crate::error::{EngineError, ValidationError};
use crate::log::ExecutionLog;
use crate::models::{
    Action, ActionKind, ActionOutcome, ActionStatus, ExecutionReason, ExecutionRecord,
    ExecutionStatus, Trigger, Workflow, WorkflowTemplate,
};
use crate::validate::{declared_bindings, loop_items_path, loop_limit, validate_workflow};

const SKIP_GATE: &str = "gate";
const SKIP_ABORTED: &str = "aborted";
const SKIP_CANCELLED: &str = "cancelled";

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<IntegrationRegistry>,
    log: ExecutionLog,
    config: EngineConfig,
    /// Runs currently executing, per workflow id.
    in_flight: Mutex<HashMap<Uuid, usize>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<IntegrationRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                registry,
                log: ExecutionLog::new(),
                config,
                in_flight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Workflow definitions
    // -----------------------------------------------------------------------

    /// Validate and persist `workflow`, replacing any definition with the same id.
    ///
    /// # Errors
    /// `EngineError::Validation` if the definition is rejected; nothing is
    /// stored in that case.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, name = %workflow.name))]
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<Uuid, EngineError> {
        validate_workflow(&workflow, &self.inner.config)?;

        let definition = serde_json::to_value(&workflow)?;
        let mut row = WorkflowRow::new(workflow.id, workflow.name.clone(), definition);
        if let Ok(existing) = self.inner.store.load_workflow(workflow.id).await {
            row.created_at = existing.created_at;
        }
        self.inner.store.save_workflow(row).await?;

        info!(actions = workflow.actions.len(), trigger = workflow.trigger.kind(), "workflow registered");
        Ok(workflow.id)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        self.inner.load_workflow(id).await
    }

    /// Every decodable workflow, newest first. Undecodable rows are logged and skipped.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        let rows = self.inner.store.list_workflows().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                decode_workflow(row)
                    .map_err(|e| warn!(workflow_id = %id, error = %e, "skipping undecodable workflow"))
                    .ok()
            })
            .collect())
    }

    pub async fn delete_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        self.inner
            .store
            .delete_workflow(id)
            .await
            .map_err(|e| lookup_error(e, EngineError::WorkflowNotFound(id)))?;
        info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    pub async fn save_template(&self, template: WorkflowTemplate) -> Result<Uuid, EngineError> {
        validate_workflow(&template.workflow, &self.inner.config)?;

        let row = TemplateRow {
            id: template.id,
            name: template.name,
            description: template.description,
            definition: serde_json::to_value(&template.workflow)?,
            created_at: template.created_at,
        };
        self.inner.store.save_template(row).await?;
        info!(template_id = %template.id, "template saved");
        Ok(template.id)
    }

    pub async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, EngineError> {
        let rows = self.inner.store.list_templates().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                decode_template(row)
                    .map_err(|e| warn!(template_id = %id, error = %e, "skipping undecodable template"))
                    .ok()
            })
            .collect())
    }

    /// Register a fresh workflow (new id, version 1) stamped from a template.
    pub async fn instantiate_template(
        &self,
        template_id: Uuid,
        name: Option<String>,
    ) -> Result<Uuid, EngineError> {
        let row = self
            .inner
            .store
            .load_template(template_id)
            .await
            .map_err(|e| lookup_error(e, EngineError::TemplateNotFound(template_id)))?;
        let template = decode_template(row)?;

        let mut workflow = template.workflow;
        workflow.id = Uuid::new_v4();
        workflow.version = 1;
        workflow.created_at = Utc::now();
        workflow.name = name.unwrap_or(template.name);

        debug!(template_id = %template_id, workflow_id = %workflow.id, "instantiating template");
        self.register_workflow(workflow).await
    }

    // -----------------------------------------------------------------------
    // Triggering
    // -----------------------------------------------------------------------

    /// Start a run and return its execution id immediately.
    ///
    /// Missing or malformed workflows are not an error here: the run records a
    /// `ValidationError` execution, observable through the log.
    ///
    /// # Errors
    /// `EngineError::ShuttingDown` once [`shutdown`](Self::shutdown) has begun.
    #[instrument(skip_all, fields(workflow_id = %workflow_id, reason = %reason))]
    pub fn trigger(
        &self,
        workflow_id: Uuid,
        payload: Value,
        reason: ExecutionReason,
    ) -> Result<Uuid, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let execution_id = Uuid::new_v4();
        let span = info_span!("execution", %workflow_id, %execution_id, %reason);
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(
            async move {
                inner.execute(execution_id, workflow_id, payload, reason).await;
            }
            .instrument(span),
        );

        debug!(execution_id = %execution_id, "execution enqueued");
        Ok(execution_id)
    }

    /// Run to completion and return the record (also appended to the log).
    pub async fn run(
        &self,
        workflow_id: Uuid,
        payload: Value,
        reason: ExecutionReason,
    ) -> Result<ExecutionRecord, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let execution_id = Uuid::new_v4();
        let span = info_span!("execution", %workflow_id, %execution_id, %reason);
        let inner = Arc::clone(&self.inner);
        let record = self
            .inner
            .tasks
            .track_future(inner.execute(execution_id, workflow_id, payload, reason))
            .instrument(span)
            .await;
        Ok(record)
    }

    /// Trigger every enabled workflow listening for event `name`.
    pub async fn emit_event(&self, name: &str, payload: Value) -> Result<Vec<Uuid>, EngineError> {
        let targets: Vec<Uuid> = self
            .list_workflows()
            .await?
            .into_iter()
            .filter(|wf| wf.enabled && matches!(&wf.trigger, Trigger::Event { name: n } if n == name))
            .map(|wf| wf.id)
            .collect();

        info!(event = %name, matched = targets.len(), "event emitted");
        targets
            .into_iter()
            .map(|id| self.trigger(id, payload.clone(), ExecutionReason::Event))
            .collect()
    }

    /// Trigger every workflow whose webhook path matches. Disabled workflows
    /// run too, flagged `disabled_override`.
    pub async fn handle_webhook(&self, path: &str, payload: Value) -> Result<Vec<Uuid>, EngineError> {
        let path = normalize_path(path);
        let targets: Vec<Uuid> = self
            .list_workflows()
            .await?
            .into_iter()
            .filter(|wf| matches!(&wf.trigger, Trigger::Webhook { path: p } if normalize_path(p) == path))
            .map(|wf| wf.id)
            .collect();

        info!(path = %path, matched = targets.len(), "webhook received");
        targets
            .into_iter()
            .map(|id| self.trigger(id, payload.clone(), ExecutionReason::Webhook))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Observation & lifecycle
    // -----------------------------------------------------------------------

    pub fn execution_log(&self) -> &ExecutionLog {
        &self.inner.log
    }

    /// Completion notifications: one message per appended record.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionRecord> {
        self.inner.log.subscribe()
    }

    pub fn is_running(&self, workflow_id: Uuid) -> bool {
        self.inner.in_flight.lock().contains_key(&workflow_id)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel in-flight runs and wait for them to record their outcome.
    ///
    /// Runs stop issuing adapter calls; already-completed actions are kept.
    pub async fn shutdown(&self) {
        info!(in_flight = self.inner.tasks.len(), "engine shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("engine stopped");
    }
}

fn normalize_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

fn lookup_error(err: StoreError, not_found: EngineError) -> EngineError {
    match err {
        StoreError::NotFound(_) => not_found,
        other => EngineError::Store(other),
    }
}

fn decode_workflow(row: WorkflowRow) -> Result<Workflow, ValidationError> {
    let mut workflow: Workflow = serde_json::from_value(row.definition)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    workflow.id = row.id;
    Ok(workflow)
}

fn decode_template(row: TemplateRow) -> Result<WorkflowTemplate, ValidationError> {
    let workflow: Workflow = serde_json::from_value(row.definition)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    Ok(WorkflowTemplate {
        id: row.id,
        name: row.name,
        description: row.description,
        workflow,
        created_at: row.created_at,
    })
}

// ---------------------------------------------------------------------------
// In-flight tracking
// ---------------------------------------------------------------------------

struct InFlightGuard<'a> {
    running: &'a Mutex<HashMap<Uuid, usize>>,
    workflow_id: Uuid,
}

impl<'a> InFlightGuard<'a> {
    /// `None` if the workflow is non-concurrent and already running.
    fn claim(running: &'a Mutex<HashMap<Uuid, usize>>, workflow: &Workflow) -> Option<Self> {
        let mut table = running.lock();
        let active = table.get(&workflow.id).copied().unwrap_or(0);
        if active > 0 && !workflow.allow_concurrent_executions {
            return None;
        }
        table.insert(workflow.id, active + 1);
        Some(Self {
            running,
            workflow_id: workflow.id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.running.lock();
        if let Some(count) = table.get_mut(&self.workflow_id) {
            *count -= 1;
            if *count == 0 {
                table.remove(&self.workflow_id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

enum Halt {
    Aborted { action_id: String, message: String },
    Cancelled,
}

impl Halt {
    fn skip_reason(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => SKIP_ABORTED,
            Self::Cancelled => SKIP_CANCELLED,
        }
    }
}

struct RunState {
    workflow_id: Uuid,
    execution_id: Uuid,
    outcomes: Vec<ActionOutcome>,
    halt: Option<Halt>,
    first_failure: Option<String>,
    /// Output of the most recent successful action; a loop iteration's result.
    last_output: Option<Value>,
}

impl RunState {
    fn new(workflow_id: Uuid, execution_id: Uuid) -> Self {
        Self {
            workflow_id,
            execution_id,
            outcomes: Vec::new(),
            halt: None,
            first_failure: None,
            last_output: None,
        }
    }

    /// Hold a place for a control-flow action whose body records entries of its own.
    fn reserve(&mut self, action: &Action, iteration: Option<u32>) -> usize {
        self.outcomes.push(ActionOutcome::skipped(&action.id, iteration, "pending"));
        self.outcomes.len() - 1
    }

    fn skip(&mut self, action: &Action, iteration: Option<u32>, reason: &str) {
        self.outcomes.push(ActionOutcome::skipped(&action.id, iteration, reason));
    }

    fn succeed(&mut self, slot: Option<usize>, outcome: ActionOutcome) {
        self.last_output = outcome.output.clone();
        self.place(slot, outcome);
    }

    /// Record a final failure and apply the action's abort/continue policy.
    fn fail(&mut self, slot: Option<usize>, action: &Action, outcome: ActionOutcome) {
        let message = outcome.error.clone().unwrap_or_default();
        warn!(
            "action '{}' failed after {} attempt(s): {}",
            action.id, outcome.attempts, message
        );
        self.place(slot, outcome);

        if self.first_failure.is_none() {
            self.first_failure = Some(format!("action '{}' failed: {}", action.id, message));
        }
        if action.on_error.aborts_on_failure() {
            self.halt = Some(Halt::Aborted {
                action_id: action.id.clone(),
                message,
            });
        }
    }

    fn place(&mut self, slot: Option<usize>, outcome: ActionOutcome) {
        match slot.and_then(|i| self.outcomes.get_mut(i)) {
            Some(entry) => *entry = outcome,
            None => self.outcomes.push(outcome),
        }
    }

    fn finish(&mut self) -> (ExecutionStatus, Option<String>) {
        match &self.halt {
            Some(Halt::Cancelled) => (
                ExecutionStatus::Cancelled,
                Some("execution cancelled by engine shutdown".into()),
            ),
            Some(Halt::Aborted { action_id, message }) => (
                ExecutionStatus::Aborted,
                Some(
                    EngineError::Aborted {
                        action_id: action_id.clone(),
                        message: message.clone(),
                    }
                    .to_string(),
                ),
            ),
            None => match self.first_failure.take() {
                Some(message) => (ExecutionStatus::Failed, Some(message)),
                None => (ExecutionStatus::Succeeded, None),
            },
        }
    }
}

fn outcome(
    action: &Action,
    status: ActionStatus,
    iteration: Option<u32>,
    started_at: DateTime<Utc>,
) -> ActionOutcome {
    ActionOutcome {
        action_id: action.id.clone(),
        status,
        attempts: 0,
        iteration,
        error: None,
        reason: None,
        output: None,
        started_at,
        finished_at: Utc::now(),
    }
}

fn failed(
    action: &Action,
    iteration: Option<u32>,
    started_at: DateTime<Utc>,
    attempts: u32,
    error: impl Into<String>,
) -> ActionOutcome {
    let mut o = outcome(action, ActionStatus::Failed, iteration, started_at);
    o.attempts = attempts;
    o.error = Some(error.into());
    o
}

/// Result of a single adapter invocation.
enum Attempt {
    Done(Value),
    Failed { message: String, retryable: bool },
    Cancelled,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl EngineInner {
    async fn load_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        let row = self
            .store
            .load_workflow(id)
            .await
            .map_err(|e| lookup_error(e, EngineError::WorkflowNotFound(id)))?;
        Ok(decode_workflow(row)?)
    }

    async fn execute(
        self: Arc<Self>,
        execution_id: Uuid,
        workflow_id: Uuid,
        payload: Value,
        reason: ExecutionReason,
    ) -> ExecutionRecord {
        let started_at = Utc::now();
        let mut record = ExecutionRecord {
            execution_id,
            workflow_id,
            workflow_version: None,
            reason,
            status: ExecutionStatus::Succeeded,
            disabled_override: false,
            started_at,
            finished_at: started_at,
            trigger_payload: payload.clone(),
            per_action_status: Vec::new(),
            error: None,
        };

        let loaded = match self.load_workflow(workflow_id).await {
            Ok(wf) => validate_workflow(&wf, &self.config).map(|()| wf).map_err(EngineError::from),
            Err(e) => Err(e),
        };
        let workflow = match loaded {
            Ok(wf) => wf,
            Err(e) => {
                record.status = match e {
                    EngineError::Store(_) => ExecutionStatus::Failed,
                    _ => ExecutionStatus::ValidationError,
                };
                record.error = Some(e.to_string());
                return self.commit(record);
            }
        };
        record.workflow_version = Some(workflow.version);

        if !workflow.enabled {
            if reason == ExecutionReason::Scheduled {
                record.status = ExecutionStatus::SchedulingSkipped;
                record.error = Some("workflow is disabled".into());
                return self.commit(record);
            }
            record.disabled_override = true;
            info!("running disabled workflow on explicit {} request", reason);
        }

        let Some(guard) = InFlightGuard::claim(&self.in_flight, &workflow) else {
            record.status = ExecutionStatus::SchedulingSkipped;
            record.error = Some("another execution of this workflow is in flight".into());
            return self.commit(record);
        };

        info!("executing {} actions", workflow.actions.len());
        let mut state = RunState::new(workflow.id, execution_id);
        let mut bindings =
            Bindings::new(payload).with_declared(declared_bindings(&workflow.actions));
        self.run_actions(&workflow.actions, &mut bindings, &mut state, None).await;
        drop(guard);

        let (status, error) = state.finish();
        record.status = status;
        record.error = error;
        record.per_action_status = state.outcomes;
        self.commit(record)
    }

    fn commit(&self, mut record: ExecutionRecord) -> ExecutionRecord {
        record.finished_at = Utc::now();
        match record.status {
            ExecutionStatus::Succeeded => info!(status = %record.status, "execution finished"),
            _ => warn!(
                status = %record.status,
                error = record.error.as_deref().unwrap_or(""),
                "execution finished"
            ),
        }
        self.log.append(record.clone());
        record
    }

    fn run_actions<'a>(
        &'a self,
        actions: &'a [Action],
        bindings: &'a mut Bindings,
        state: &'a mut RunState,
        iteration: Option<u32>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for action in actions {
                if state.halt.is_none() && self.shutdown.is_cancelled() {
                    state.halt = Some(Halt::Cancelled);
                }
                if let Some(halt) = &state.halt {
                    let reason = halt.skip_reason();
                    state.skip(action, iteration, reason);
                    continue;
                }
                self.run_action(action, bindings, state, iteration).await;
            }
        })
    }

    async fn run_action(
        &self,
        action: &Action,
        bindings: &mut Bindings,
        state: &mut RunState,
        iteration: Option<u32>,
    ) {
        // A conditional's gate picks the branch instead of skipping.
        if action.kind != ActionKind::Conditional {
            if let Some(gate) = &action.gate {
                match evaluate(gate, &*bindings) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(action_id = %action.id, "gate not satisfied; skipping");
                        state.skip(action, iteration, SKIP_GATE);
                        return;
                    }
                    Err(e) => {
                        state.fail(None, action, failed(action, iteration, Utc::now(), 0, e.to_string()));
                        return;
                    }
                }
            }
        }

        match action.kind {
            ActionKind::Loop => self.run_loop(action, bindings, state, iteration).await,
            ActionKind::Conditional => self.run_conditional(action, bindings, state, iteration).await,
            _ => self.run_service(action, bindings, state, iteration).await,
        }
    }

    #[instrument(skip_all, fields(action_id = %action.id, kind = %action.kind))]
    async fn run_service(
        &self,
        action: &Action,
        bindings: &mut Bindings,
        state: &mut RunState,
        iteration: Option<u32>,
    ) {
        let started_at = Utc::now();
        let service = action.target_service.as_deref().unwrap_or_default();

        // An unresolved reference means a producer was skipped; not retryable.
        let params = match bindings.render(&action.params) {
            Ok(params) => params,
            Err(e) => {
                state.fail(None, action, failed(action, iteration, started_at, 0, e.to_string()));
                return;
            }
        };

        let timeout = action
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_action_timeout());
        let max_attempts = action.on_error.max_attempts();
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;
            match self.call_once(action, service, &params, state, attempts, timeout).await {
                Attempt::Done(output) => break Ok(output),
                Attempt::Cancelled => break Err(None),
                Attempt::Failed { message, retryable } => {
                    if !retryable || attempts >= max_attempts {
                        break Err(Some(message));
                    }

                    let delay = action.on_error.retry_delay(attempts, self.config.max_backoff());
                    warn!(
                        "action '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        action.id, attempts, max_attempts, delay, message
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break Err(None),
                    }
                }
            }
        };

        match result {
            Ok(output) => {
                debug!(attempts, "action succeeded");
                if let Some(name) = &action.output_binding {
                    bindings.bind(name.clone(), output.clone());
                }
                let mut o = outcome(action, ActionStatus::Success, iteration, started_at);
                o.attempts = attempts;
                o.output = Some(output);
                state.succeed(None, o);
            }
            Err(Some(message)) => {
                state.fail(None, action, failed(action, iteration, started_at, attempts, message));
            }
            Err(None) => {
                // The call was issued, so this is a failure, not a skip.
                state
                    .outcomes
                    .push(failed(action, iteration, started_at, attempts, "cancelled"));
                state.halt = Some(Halt::Cancelled);
            }
        }
    }

    async fn call_once(
        &self,
        action: &Action,
        service: &str,
        params: &Value,
        state: &RunState,
        attempt: u32,
        timeout: Duration,
    ) -> Attempt {
        // Resolved per attempt so a re-registration between retries is picked up.
        let resolved = match self.registry.resolve(service) {
            Ok(resolved) => resolved,
            Err(e) => {
                return Attempt::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };

        let ctx = ActionContext {
            workflow_id: state.workflow_id,
            execution_id: state.execution_id,
            action_id: action.id.clone(),
            attempt,
            credentials: resolved.credentials().clone(),
        };
        let call = resolved.adapter().execute_action(action.kind, params, &ctx);

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Attempt::Cancelled,
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(output)) => Attempt::Done(output),
                Ok(Err(e)) => Attempt::Failed {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                },
                Err(_) => Attempt::Failed {
                    message: format!("timed out after {}ms", timeout.as_millis()),
                    retryable: true,
                },
            },
        }
    }

    async fn run_loop(
        &self,
        action: &Action,
        bindings: &mut Bindings,
        state: &mut RunState,
        iteration: Option<u32>,
    ) {
        let started_at = Utc::now();
        let slot = state.reserve(action, iteration);

        let items = loop_limit(action, &self.config)
            .map_err(|e| e.to_string())
            .and_then(|limit| {
                let items = loop_items(action, bindings)?;
                if items.len() > limit {
                    return Err(ValidationError::LoopLimitExceeded {
                        action_id: action.id.clone(),
                        declared: items.len(),
                        limit,
                    }
                    .to_string());
                }
                Ok(items)
            });
        let items = match items {
            Ok(items) => items,
            Err(message) => {
                state.fail(Some(slot), action, failed(action, iteration, started_at, 0, message));
                return;
            }
        };

        debug!(action_id = %action.id, items = items.len(), "loop started");
        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if state.halt.is_some() {
                break;
            }
            if self.shutdown.is_cancelled() {
                state.halt = Some(Halt::Cancelled);
                break;
            }

            let mut scope = bindings.for_iteration(index, item);
            state.last_output = None;
            self.run_actions(&action.body, &mut scope, state, Some(index as u32))
                .await;
            outputs.push(state.last_output.take().unwrap_or(Value::Null));
        }

        self.settle_control(slot, action, bindings, state, iteration, started_at, Value::Array(outputs));
    }

    async fn run_conditional(
        &self,
        action: &Action,
        bindings: &mut Bindings,
        state: &mut RunState,
        iteration: Option<u32>,
    ) {
        let started_at = Utc::now();
        let slot = state.reserve(action, iteration);

        let taken = match action.gate.as_ref().map(|gate| evaluate(gate, &*bindings)) {
            Some(Ok(taken)) => taken,
            Some(Err(e)) => {
                state.fail(Some(slot), action, failed(action, iteration, started_at, 0, e.to_string()));
                return;
            }
            None => {
                state.fail(
                    Some(slot),
                    action,
                    failed(action, iteration, started_at, 0, "conditional has no gate"),
                );
                return;
            }
        };

        let (branch, label) = if taken {
            (&action.then, "then")
        } else {
            (&action.otherwise, "else")
        };
        debug!(action_id = %action.id, branch = label, "conditional evaluated");
        self.run_actions(branch, bindings, state, iteration).await;

        self.settle_control(slot, action, bindings, state, iteration, started_at, json!({ "branch": label }));
    }

    /// Settle a loop/conditional slot once its sub-actions have run.
    #[allow(clippy::too_many_arguments)]
    fn settle_control(
        &self,
        slot: usize,
        action: &Action,
        bindings: &mut Bindings,
        state: &mut RunState,
        iteration: Option<u32>,
        started_at: DateTime<Utc>,
        output: Value,
    ) {
        match &state.halt {
            Some(Halt::Cancelled) => {
                let mut o = outcome(action, ActionStatus::Skipped, iteration, started_at);
                o.reason = Some(SKIP_CANCELLED.into());
                state.place(Some(slot), o);
            }
            Some(Halt::Aborted { action_id, .. }) => {
                let error = format!("aborted at action '{}'", action_id);
                state.place(Some(slot), failed(action, iteration, started_at, 0, error));
            }
            None => {
                if let Some(name) = &action.output_binding {
                    bindings.bind(name.clone(), output.clone());
                }
                let mut o = outcome(action, ActionStatus::Success, iteration, started_at);
                o.output = Some(output);
                // A conditional passes its branch's last output through.
                if action.kind == ActionKind::Conditional {
                    state.place(Some(slot), o);
                } else {
                    state.succeed(Some(slot), o);
                }
            }
        }
    }
}

/// The sequence a loop iterates: a binding path, or a literal array.
fn loop_items(action: &Action, bindings: &Bindings) -> Result<Vec<Value>, String> {
    match action.params.get("items") {
        Some(Value::String(raw)) => {
            let path = loop_items_path(raw);
            match bindings.resolve(path).map(|v| v.into_owned()) {
                Some(Value::Array(items)) => Ok(items),
                Some(_) => Err(format!("loop items '{}' is not a sequence", path)),
                None => Err(format!("unresolved reference '{}'", path)),
            }
        }
        Some(literal @ Value::Array(_)) => match bindings.render_value(literal) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Err("loop items is not a sequence".into()),
            Err(e) => Err(e.to_string()),
        },
        _ => Err("loop has no 'items' param".into()),
    }
}
