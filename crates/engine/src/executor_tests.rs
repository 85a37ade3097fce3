//! End-to-end tests for the workflow engine.
//!
//! Every test wires a real `WorkflowEngine` to an `InMemoryStore` and a
//! registry of `MockAdapter`s, so adapter invocations can be counted and
//! inspected without any external service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use integrations::mock::MockAdapter;
use integrations::{IntegrationCredentials, IntegrationRegistry};
use store::{InMemoryStore, WorkflowRow, WorkflowStore};

use crate::condition::{Operator, Predicate};
use crate::config::{EngineConfig, SchedulerConfig};
use crate::error::{EngineError, ValidationError};
use crate::executor::WorkflowEngine;
use crate::models::{
    Action, ActionKind, ActionStatus, Backoff, ErrorPolicy, ExecutionReason, ExecutionRecord,
    ExecutionStatus, FailureMode, Trigger, Workflow, WorkflowTemplate,
};
use crate::scheduler::WorkflowScheduler;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    engine: WorkflowEngine,
    registry: Arc<IntegrationRegistry>,
    store: Arc<InMemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let registry = Arc::new(IntegrationRegistry::new());
        let store = Arc::new(InMemoryStore::new());
        let engine = WorkflowEngine::new(store.clone(), registry.clone(), config);
        Self { engine, registry, store }
    }

    /// Register `adapter` under `service` and keep a handle for inspection.
    fn adapter(&self, service: &str, adapter: MockAdapter) -> Arc<MockAdapter> {
        let adapter = Arc::new(adapter);
        self.registry
            .register(service, adapter.clone(), IntegrationCredentials::new(service));
        adapter
    }

    async fn register(&self, workflow: Workflow) -> Uuid {
        self.engine
            .register_workflow(workflow)
            .await
            .expect("workflow should register")
    }

    async fn run(&self, id: Uuid, payload: Value) -> ExecutionRecord {
        self.engine
            .run(id, payload, ExecutionReason::Manual)
            .await
            .expect("engine is running")
    }
}

fn call(id: &str, service: &str) -> Action {
    Action::service(id, ActionKind::ApiCall, service)
}

fn manual(name: &str, actions: Vec<Action>) -> Workflow {
    Workflow::new(name, Trigger::Manual, actions)
}

fn retry(max_retries: u32, then: FailureMode) -> ErrorPolicy {
    ErrorPolicy::Retry {
        max_retries,
        backoff_ms: 5,
        backoff: Backoff::Fixed,
        then,
    }
}

fn statuses(record: &ExecutionRecord) -> Vec<(&str, ActionStatus)> {
    record
        .per_action_status
        .iter()
        .map(|o| (o.action_id.as_str(), o.status))
        .collect()
}

async fn next_record(rx: &mut broadcast::Receiver<ExecutionRecord>) -> ExecutionRecord {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no execution finished in time")
        .expect("log channel closed")
}

async fn wait_until_running(engine: &WorkflowEngine, id: Uuid) {
    for _ in 0..400 {
        if engine.is_running(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow {id} never started");
}

// ============================================================
// Sequencing and gates
// ============================================================

#[tokio::test]
async fn actions_run_in_declaration_order() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::echo("svc"));
    let id = h
        .register(manual("ordered", vec![call("a", "svc"), call("b", "svc"), call("c", "svc")]))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    let order: Vec<String> = svc.calls().into_iter().map(|c| c.action_id).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(
        statuses(&record),
        vec![
            ("a", ActionStatus::Success),
            ("b", ActionStatus::Success),
            ("c", ActionStatus::Success),
        ]
    );
}

#[tokio::test]
async fn gate_on_low_priority_skips_without_calling_adapter() {
    let h = Harness::new();
    let first = h.adapter("first", MockAdapter::echo("first"));
    let second = h.adapter("second", MockAdapter::echo("second"));
    let id = h
        .register(manual(
            "priority",
            vec![
                call("Action1", "first"),
                call("Action2", "second").gated(Predicate::equals("priority", json!("high"))),
            ],
        ))
        .await;

    let record = h.run(id, json!({ "priority": "low" })).await;

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(first.call_count(), 1);
    assert_eq!(second.call_count(), 0);
    let skipped = record.outcome("Action2").unwrap();
    assert_eq!(skipped.status, ActionStatus::Skipped);
    assert_eq!(skipped.reason.as_deref(), Some("gate"));
    assert_eq!(skipped.attempts, 0);
}

#[tokio::test]
async fn outputs_are_bound_and_rendered_into_later_params() {
    let h = Harness::new();
    h.adapter("crm", MockAdapter::returning("crm", json!({ "name": "Ana", "open": 3 })));
    let mail = h.adapter("mail", MockAdapter::echo("mail"));
    let id = h
        .register(manual(
            "render",
            vec![
                call("lookup", "crm").bind("contact"),
                Action::service("notify", ActionKind::Email, "mail").with_params(json!({
                    "to": "{{ trigger.email }}",
                    "subject": "{{ contact.name }} has {{ contact.open }} open deals",
                    "raw": "{{ contact }}"
                })),
            ],
        ))
        .await;

    h.run(id, json!({ "email": "ana@example.com" })).await;

    let params = &mail.calls()[0].params;
    assert_eq!(params["to"], "ana@example.com");
    assert_eq!(params["subject"], "Ana has 3 open deals");
    assert_eq!(params["raw"], json!({ "name": "Ana", "open": 3 }));
    assert_eq!(mail.calls()[0].kind, ActionKind::Email);
}

#[tokio::test]
async fn reference_to_skipped_producer_fails_without_retry() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::echo("svc"));
    let consumer = h.adapter("consumer", MockAdapter::echo("consumer"));
    let id = h
        .register(manual(
            "skipped-producer",
            vec![
                call("produce", "svc")
                    .bind("made")
                    .gated(Predicate::equals("go", json!(true))),
                call("consume", "consumer")
                    .with_params(json!({ "value": "{{ made.id }}" }))
                    .on_error(retry(3, FailureMode::Continue)),
            ],
        ))
        .await;

    let record = h.run(id, json!({ "go": false })).await;

    assert_eq!(consumer.call_count(), 0);
    let failed = record.outcome("consume").unwrap();
    assert_eq!(failed.status, ActionStatus::Failed);
    assert_eq!(failed.attempts, 0);
    assert!(failed.error.as_deref().unwrap().contains("made.id"));
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn gate_on_skipped_binding_propagates_skip() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::returning("svc", json!({ "ok": true })));
    let later = h.adapter("later", MockAdapter::echo("later"));
    let id = h
        .register(manual(
            "propagate",
            vec![
                call("produce", "svc")
                    .bind("made")
                    .gated(Predicate::equals("go", json!(true))),
                call("gated", "later").gated(Predicate::equals("made.ok", json!(true))),
            ],
        ))
        .await;

    let record = h.run(id, json!({ "go": false })).await;

    assert_eq!(
        statuses(&record),
        vec![("produce", ActionStatus::Skipped), ("gated", ActionStatus::Skipped)]
    );
    assert_eq!(later.call_count(), 0);
    assert_eq!(record.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn skipped_binding_is_not_filled_from_same_named_payload_field() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::echo("svc"));
    let later = h.adapter("later", MockAdapter::echo("later"));
    let consumer = h.adapter("consumer", MockAdapter::echo("consumer"));
    let id = h
        .register(manual(
            "payload-collision",
            vec![
                call("produce", "svc")
                    .bind("made")
                    .gated(Predicate::equals("go", json!(true))),
                call("gated", "later").gated(Predicate::equals("made.ok", json!(true))),
                call("consume", "consumer")
                    .with_params(json!({ "value": "{{ made.id }}" }))
                    .on_error(ErrorPolicy::Continue),
            ],
        ))
        .await;

    let payload = json!({ "go": false, "made": { "ok": true, "id": "from-payload" } });
    let record = h.run(id, payload).await;

    assert_eq!(
        statuses(&record),
        vec![
            ("produce", ActionStatus::Skipped),
            ("gated", ActionStatus::Skipped),
            ("consume", ActionStatus::Failed),
        ]
    );
    assert_eq!(later.call_count(), 0);
    assert_eq!(consumer.call_count(), 0);
    let failed = record.outcome("consume").unwrap();
    assert_eq!(failed.attempts, 0);
    assert!(failed.error.as_deref().unwrap().contains("made.id"));
}

#[tokio::test]
async fn payload_field_shadowed_by_binding_is_read_through_trigger() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::echo("svc"));
    let consumer = h.adapter("consumer", MockAdapter::echo("consumer"));
    let id = h
        .register(manual(
            "qualified",
            vec![
                call("produce", "svc")
                    .bind("made")
                    .gated(Predicate::equals("go", json!(true))),
                call("consume", "consumer")
                    .gated(Predicate::equals("trigger.made.ok", json!(true)))
                    .with_params(json!({ "value": "{{ trigger.made.id }}" })),
            ],
        ))
        .await;

    let payload = json!({ "go": false, "made": { "ok": true, "id": "from-payload" } });
    let record = h.run(id, payload).await;

    assert_eq!(record.outcome("consume").unwrap().status, ActionStatus::Success);
    assert_eq!(consumer.calls()[0].params, json!({ "value": "from-payload" }));
}

#[tokio::test]
async fn gate_comparison_error_is_an_action_failure() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::echo("svc"));
    let id = h
        .register(manual(
            "bad-compare",
            vec![
                call("a", "svc")
                    .gated(Predicate::compare("count", Operator::GreaterThan, json!(3)))
                    .on_error(ErrorPolicy::Continue),
                call("b", "svc"),
            ],
        ))
        .await;

    let record = h.run(id, json!({ "count": "many" })).await;

    assert_eq!(
        statuses(&record),
        vec![("a", ActionStatus::Failed), ("b", ActionStatus::Success)]
    );
    assert_eq!(svc.call_count(), 1);
}

// ============================================================
// Error policies
// ============================================================

#[tokio::test]
async fn retry_two_makes_three_calls_then_fails() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::failing("svc", "503"));
    let id = h
        .register(manual(
            "retry",
            vec![call("flaky", "svc").on_error(retry(2, FailureMode::Abort))],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(svc.call_count(), 3);
    let attempts: Vec<u32> = svc.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    let outcome = record.outcome("flaky").unwrap();
    assert_eq!(outcome.status, ActionStatus::Failed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(record.status, ExecutionStatus::Aborted);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_waits_between_attempts() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::failing("svc", "busy"));
    let id = h
        .register(manual(
            "backoff",
            vec![call("a", "svc").on_error(ErrorPolicy::Retry {
                max_retries: 2,
                backoff_ms: 1_000,
                backoff: Backoff::Exponential,
                then: FailureMode::Continue,
            })],
        ))
        .await;

    let started = tokio::time::Instant::now();
    let record = h.run(id, json!({})).await;

    // 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(svc.call_count(), 3);
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::flaky("svc", 2, json!({ "ok": true })));
    let id = h
        .register(manual(
            "recover",
            vec![call("a", "svc").on_error(retry(2, FailureMode::Abort)).bind("result")],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    let outcome = record.outcome("a").unwrap();
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.output, Some(json!({ "ok": true })));
    assert_eq!(svc.call_count(), 3);
}

#[tokio::test]
async fn auth_errors_are_not_retried() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::rejecting_auth("svc", "token expired"));
    let id = h
        .register(manual(
            "auth",
            vec![call("a", "svc").on_error(retry(3, FailureMode::Continue))],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(svc.call_count(), 1);
    let outcome = record.outcome("a").unwrap();
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.error.as_deref().unwrap().contains("token expired"));
}

#[tokio::test]
async fn abort_skips_remaining_actions() {
    let h = Harness::new();
    h.adapter("broken", MockAdapter::failing("broken", "boom"));
    let rest = h.adapter("rest", MockAdapter::echo("rest"));
    let id = h
        .register(manual(
            "abort",
            vec![call("a", "broken"), call("b", "rest"), call("c", "rest")],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(record.status, ExecutionStatus::Aborted);
    assert_eq!(rest.call_count(), 0);
    assert_eq!(
        statuses(&record),
        vec![
            ("a", ActionStatus::Failed),
            ("b", ActionStatus::Skipped),
            ("c", ActionStatus::Skipped),
        ]
    );
    assert_eq!(record.outcome("c").unwrap().reason.as_deref(), Some("aborted"));
    assert!(record.error.as_deref().unwrap().contains("aborted at action 'a'"));
}

#[tokio::test]
async fn continue_records_failure_and_proceeds() {
    let h = Harness::new();
    h.adapter("broken", MockAdapter::failing("broken", "boom"));
    let rest = h.adapter("rest", MockAdapter::echo("rest"));
    let id = h
        .register(manual(
            "continue",
            vec![call("a", "broken").on_error(ErrorPolicy::Continue), call("b", "rest")],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(rest.call_count(), 1);
    assert_eq!(
        statuses(&record),
        vec![("a", ActionStatus::Failed), ("b", ActionStatus::Success)]
    );
}

#[tokio::test]
async fn slow_adapter_times_out_as_failure() {
    let h = Harness::new();
    h.adapter("slow", MockAdapter::slow("slow", Duration::from_secs(5), json!(null)));
    let id = h
        .register(manual(
            "timeout",
            vec![call("a", "slow")
                .timeout(Duration::from_millis(20))
                .on_error(ErrorPolicy::Continue)],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    let outcome = record.outcome("a").unwrap();
    assert_eq!(outcome.status, ActionStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn unknown_service_fails_the_action() {
    let h = Harness::new();
    let id = h.register(manual("ghost", vec![call("a", "ghost")])).await;

    let record = h.run(id, json!({})).await;

    let outcome = record.outcome("a").unwrap();
    assert_eq!(outcome.status, ActionStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("ghost"));
    assert_eq!(record.status, ExecutionStatus::Aborted);
}

// ============================================================
// Loops and conditionals
// ============================================================

fn five_tasks() -> Value {
    json!({
        "items": [
            { "title": "write" }, { "title": "review" }, { "title": "ship" },
            { "title": "test" }, { "title": "plan" }
        ]
    })
}

#[tokio::test]
async fn loop_runs_body_once_per_element() {
    let h = Harness::new();
    h.adapter("tasks", MockAdapter::returning("tasks", five_tasks()));
    let chat = h.adapter("chat", MockAdapter::echo("chat"));
    let id = h
        .register(manual(
            "loop",
            vec![
                call("fetch", "tasks").bind("tasks"),
                Action::looping(
                    "each",
                    "tasks.items",
                    vec![call("post", "chat").with_params(json!({
                        "text": "{{ index }}: {{ item.title }}"
                    }))],
                )
                .bind("posted"),
                call("summary", "chat").with_params(json!({ "count": "{{ posted.length }}" })),
            ],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(chat.call_count(), 6);
    let loop_out = record.outcome("each").unwrap().output.clone().unwrap();
    assert_eq!(loop_out.as_array().unwrap().len(), 5);
    assert_eq!(loop_out[2], json!({ "text": "2: ship" }));

    let iterations: Vec<Option<u32>> = record.outcomes("post").map(|o| o.iteration).collect();
    assert_eq!(iterations, (0..5u32).map(Some).collect::<Vec<_>>());
    assert_eq!(chat.calls()[5].params["count"], json!(5));
}

#[tokio::test]
async fn loop_limit_is_enforced_at_registration() {
    let h = Harness::with_config(EngineConfig {
        max_loop_iterations: 3,
        ..EngineConfig::default()
    });
    let looped = Action::looping("each", "", vec![call("inner", "svc")])
        .with_params(json!({ "items": [1, 2, 3, 4] }));

    let err = h
        .engine
        .register_workflow(manual("too-many", vec![looped]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::LoopLimitExceeded { declared: 4, limit: 3, .. })
    ));
    assert!(h.engine.list_workflows().await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_runtime_sequence_fails_the_loop() {
    let h = Harness::with_config(EngineConfig {
        max_loop_iterations: 3,
        ..EngineConfig::default()
    });
    h.adapter("tasks", MockAdapter::returning("tasks", five_tasks()));
    let inner = h.adapter("svc", MockAdapter::echo("svc"));
    let id = h
        .register(manual(
            "runtime-limit",
            vec![
                call("fetch", "tasks").bind("tasks"),
                Action::looping("each", "{{ tasks.items }}", vec![call("inner", "svc")]),
            ],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(inner.call_count(), 0);
    let outcome = record.outcome("each").unwrap();
    assert_eq!(outcome.status, ActionStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("limit of 3"));
}

#[tokio::test]
async fn abort_inside_loop_body_fails_the_loop_and_stops() {
    let h = Harness::new();
    h.adapter("tasks", MockAdapter::returning("tasks", five_tasks()));
    let broken = h.adapter("broken", MockAdapter::failing("broken", "nope"));
    let after = h.adapter("after", MockAdapter::echo("after"));
    let id = h
        .register(manual(
            "loop-abort",
            vec![
                call("fetch", "tasks").bind("tasks"),
                Action::looping("each", "tasks.items", vec![call("inner", "broken")]),
                call("after", "after"),
            ],
        ))
        .await;

    let record = h.run(id, json!({})).await;

    assert_eq!(broken.call_count(), 1);
    assert_eq!(after.call_count(), 0);
    assert_eq!(record.status, ExecutionStatus::Aborted);
    assert_eq!(record.outcome("each").unwrap().status, ActionStatus::Failed);
    assert_eq!(record.outcome("after").unwrap().reason.as_deref(), Some("aborted"));
}

#[tokio::test]
async fn conditional_takes_matching_branch() {
    let h = Harness::new();
    let pager = h.adapter("pager", MockAdapter::returning("pager", json!({ "paged": true })));
    let mail = h.adapter("mail", MockAdapter::echo("mail"));
    let audit = h.adapter("audit", MockAdapter::echo("audit"));
    let id = h
        .register(manual(
            "route",
            vec![
                Action::conditional(
                    "route",
                    Predicate::equals("priority", json!("high")),
                    vec![call("page", "pager").bind("page")],
                    vec![call("mail", "mail")],
                ),
                call("audit", "audit").gated(Predicate::equals("page.paged", json!(true))),
            ],
        ))
        .await;

    let high = h.run(id, json!({ "priority": "high" })).await;
    assert_eq!(pager.call_count(), 1);
    assert_eq!(mail.call_count(), 0);
    assert_eq!(audit.call_count(), 1);
    assert_eq!(high.outcome("route").unwrap().output, Some(json!({ "branch": "then" })));

    let low = h.run(id, json!({ "priority": "low" })).await;
    assert_eq!(pager.call_count(), 1);
    assert_eq!(mail.call_count(), 1);
    assert_eq!(audit.call_count(), 1);
    assert_eq!(low.outcome("audit").unwrap().status, ActionStatus::Skipped);
    assert_eq!(low.status, ExecutionStatus::Succeeded);
}

// ============================================================
// Concurrency, enablement, and lookup
// ============================================================

#[tokio::test]
async fn second_fire_while_running_is_scheduling_skipped() {
    let h = Harness::new();
    let slow = h.adapter("slow", MockAdapter::slow("slow", Duration::from_millis(200), json!({})));
    let id = h.register(manual("exclusive", vec![call("a", "slow")])).await;
    let mut rx = h.engine.subscribe();

    h.engine.trigger(id, json!({}), ExecutionReason::Manual).unwrap();
    wait_until_running(&h.engine, id).await;

    let second = h.run(id, json!({})).await;
    assert_eq!(second.status, ExecutionStatus::SchedulingSkipped);
    assert!(second.per_action_status.is_empty());

    let skipped = next_record(&mut rx).await;
    assert_eq!(skipped.execution_id, second.execution_id);
    let first = next_record(&mut rx).await;
    assert_eq!(first.status, ExecutionStatus::Succeeded);
    assert_eq!(slow.call_count(), 1);
    assert!(!h.engine.is_running(id));
}

#[tokio::test]
async fn concurrent_workflows_may_overlap() {
    let h = Harness::new();
    let slow = h.adapter("slow", MockAdapter::slow("slow", Duration::from_millis(100), json!({})));
    let mut wf = manual("parallel", vec![call("a", "slow")]);
    wf.allow_concurrent_executions = true;
    let id = h.register(wf).await;
    let mut rx = h.engine.subscribe();

    h.engine.trigger(id, json!({}), ExecutionReason::Manual).unwrap();
    h.engine.trigger(id, json!({}), ExecutionReason::Manual).unwrap();

    let a = next_record(&mut rx).await;
    let b = next_record(&mut rx).await;
    assert_eq!(a.status, ExecutionStatus::Succeeded);
    assert_eq!(b.status, ExecutionStatus::Succeeded);
    assert_ne!(a.execution_id, b.execution_id);
    assert_eq!(slow.call_count(), 2);
}

#[tokio::test]
async fn disabled_workflow_runs_only_on_explicit_request() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::echo("svc"));
    let mut wf = manual("disabled", vec![call("a", "svc")]);
    wf.enabled = false;
    let id = h.register(wf).await;

    let scheduled = h
        .engine
        .run(id, json!({}), ExecutionReason::Scheduled)
        .await
        .unwrap();
    assert_eq!(scheduled.status, ExecutionStatus::SchedulingSkipped);
    assert_eq!(svc.call_count(), 0);

    let manual_run = h.run(id, json!({})).await;
    assert_eq!(manual_run.status, ExecutionStatus::Succeeded);
    assert!(manual_run.disabled_override);
    assert_eq!(manual_run.reason, ExecutionReason::Manual);
    assert_eq!(svc.call_count(), 1);
}

#[tokio::test]
async fn missing_or_malformed_workflow_records_validation_error() {
    let h = Harness::new();

    let missing = h.run(Uuid::new_v4(), json!({})).await;
    assert_eq!(missing.status, ExecutionStatus::ValidationError);
    assert!(missing.per_action_status.is_empty());

    let id = Uuid::new_v4();
    h.store
        .save_workflow(WorkflowRow::new(id, "broken", json!({ "actions": "nope" })))
        .await
        .unwrap();
    let malformed = h.run(id, json!({})).await;
    assert_eq!(malformed.status, ExecutionStatus::ValidationError);
    assert!(malformed.error.as_deref().unwrap().contains("malformed"));

    assert_eq!(h.engine.execution_log().len(), 2);
}

#[tokio::test]
async fn invalid_workflow_is_rejected_synchronously() {
    let h = Harness::new();
    let err = h
        .engine
        .register_workflow(manual(
            "forward",
            vec![
                call("send", "svc").with_params(json!({ "x": "{{ later }}" })),
                call("produce", "svc").bind("later"),
            ],
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UndefinedBinding { .. })
    ));
    assert!(h.engine.execution_log().is_empty());
}

#[tokio::test]
async fn delete_unknown_workflow_is_not_found() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    assert!(matches!(
        h.engine.delete_workflow(id).await,
        Err(EngineError::WorkflowNotFound(missing)) if missing == id
    ));
}

// ============================================================
// Fan-out triggers
// ============================================================

#[tokio::test]
async fn webhook_fans_out_to_every_matching_workflow() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::echo("svc"));
    let hook = |name: &str, path: &str| {
        Workflow::new(
            name,
            Trigger::Webhook { path: path.into() },
            vec![call("a", "svc")],
        )
    };
    let live = h.register(hook("live", "orders")).await;
    let mut off = hook("off", "/orders");
    off.enabled = false;
    let off = h.register(off).await;
    h.register(hook("other", "refunds")).await;
    let mut rx = h.engine.subscribe();

    let fired = h
        .engine
        .handle_webhook("/orders/", json!({ "order_id": 7 }))
        .await
        .unwrap();
    assert_eq!(fired.len(), 2);

    let mut records = vec![next_record(&mut rx).await, next_record(&mut rx).await];
    records.sort_by_key(|r| r.workflow_id == off);
    assert_eq!(records[0].workflow_id, live);
    assert!(!records[0].disabled_override);
    assert_eq!(records[1].workflow_id, off);
    assert!(records[1].disabled_override);
    assert!(records.iter().all(|r| r.reason == ExecutionReason::Webhook));
    assert_eq!(records[0].trigger_payload, json!({ "order_id": 7 }));
}

#[tokio::test]
async fn events_trigger_enabled_listeners_only() {
    let h = Harness::new();
    let svc = h.adapter("svc", MockAdapter::echo("svc"));
    let listener = |name: &str| {
        Workflow::new(
            name,
            Trigger::Event { name: "signup".into() },
            vec![call("a", "svc").with_params(json!({ "user": "{{ trigger.user }}" }))],
        )
    };
    let on = h.register(listener("on")).await;
    let mut off = listener("off");
    off.enabled = false;
    h.register(off).await;
    let mut rx = h.engine.subscribe();

    let fired = h.engine.emit_event("signup", json!({ "user": "bo" })).await.unwrap();
    assert_eq!(fired.len(), 1);

    let record = next_record(&mut rx).await;
    assert_eq!(record.workflow_id, on);
    assert_eq!(record.reason, ExecutionReason::Event);
    assert_eq!(svc.calls()[0].params["user"], "bo");
    assert!(h.engine.emit_event("unknown", json!({})).await.unwrap().is_empty());
}

// ============================================================
// Scheduled scenario
// ============================================================

#[tokio::test]
async fn daily_digest_fires_monday_morning() {
    let h = Harness::new();
    h.adapter("tasks", MockAdapter::returning("tasks", five_tasks()));
    let chat = h.adapter("chat", MockAdapter::echo("chat"));
    let id = h
        .register(Workflow::new(
            "DailyDigest",
            Trigger::Schedule {
                expression: "0 9 * * Mon-Fri".into(),
            },
            vec![
                call("FetchTasks", "tasks").bind("FetchTasks"),
                Action::service("SendMessage", ActionKind::Notification, "chat").with_params(json!({
                    "message": "You have {{ FetchTasks.items.length }} tasks today"
                })),
            ],
        ))
        .await;

    let scheduler = WorkflowScheduler::new(h.engine.clone(), SchedulerConfig::default());
    let sunday_evening = Utc.with_ymd_and_hms(2026, 10, 18, 20, 0, 0).unwrap();
    let monday_nine = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();

    assert!(scheduler.tick(sunday_evening).await.is_empty());
    assert_eq!(scheduler.next_fire_time(id), Some(monday_nine));

    let mut rx = h.engine.subscribe();
    assert_eq!(scheduler.tick(monday_nine).await, vec![id]);
    let record = next_record(&mut rx).await;

    assert_eq!(record.reason, ExecutionReason::Scheduled);
    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(
        statuses(&record),
        vec![
            ("FetchTasks", ActionStatus::Success),
            ("SendMessage", ActionStatus::Success),
        ]
    );
    assert_eq!(chat.calls()[0].params["message"], "You have 5 tasks today");
}

// ============================================================
// Lifecycle
// ============================================================

#[tokio::test]
async fn shutdown_cancels_in_flight_runs() {
    let h = Harness::new();
    let slow = h.adapter("slow", MockAdapter::slow("slow", Duration::from_secs(30), json!({})));
    let rest = h.adapter("rest", MockAdapter::echo("rest"));
    let id = h
        .register(manual("long", vec![call("wait", "slow"), call("next", "rest")]))
        .await;

    let execution_id = h.engine.trigger(id, json!({}), ExecutionReason::Manual).unwrap();
    wait_until_running(&h.engine, id).await;
    h.engine.shutdown().await;

    let record = h.engine.execution_log().get(execution_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(slow.call_count(), 1);
    assert_eq!(rest.call_count(), 0);
    assert_eq!(
        statuses(&record),
        vec![("wait", ActionStatus::Failed), ("next", ActionStatus::Skipped)]
    );
    assert_eq!(record.outcome("next").unwrap().reason.as_deref(), Some("cancelled"));

    assert!(matches!(
        h.engine.trigger(id, json!({}), ExecutionReason::Manual),
        Err(EngineError::ShuttingDown)
    ));
}

#[tokio::test]
async fn templates_instantiate_fresh_workflows() {
    let h = Harness::new();
    h.adapter("svc", MockAdapter::echo("svc"));
    let template = WorkflowTemplate {
        id: Uuid::new_v4(),
        name: "ping".into(),
        description: Some("one call".into()),
        workflow: manual("ping", vec![call("a", "svc")]),
        created_at: Utc::now(),
    };
    let template_id = h.engine.save_template(template.clone()).await.unwrap();
    assert_eq!(h.engine.list_templates().await.unwrap().len(), 1);

    let id = h
        .engine
        .instantiate_template(template_id, Some("ping-copy".into()))
        .await
        .unwrap();
    assert_ne!(id, template.workflow.id);

    let wf = h.engine.get_workflow(id).await.unwrap();
    assert_eq!(wf.name, "ping-copy");
    assert_eq!(wf.version, 1);
    assert_eq!(h.run(id, json!({})).await.status, ExecutionStatus::Succeeded);

    assert!(matches!(
        h.engine.instantiate_template(Uuid::new_v4(), None).await,
        Err(EngineError::TemplateNotFound(_))
    ));
}
