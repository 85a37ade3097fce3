//! `WorkflowScheduler`: fires `Schedule` triggers.
//!
//! On every tick the scheduler re-reads the enabled schedule-triggered
//! workflows, keeps one next-fire time per workflow, and calls
//! [`WorkflowEngine::trigger`] for each one that has come due. It never
//! suppresses a fire itself: overlapping runs are the engine's call
//! (`SchedulingSkipped`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::executor::WorkflowEngine;
use crate::models::{ExecutionReason, Trigger};
use crate::schedule::CronSchedule;

struct ScheduleEntry {
    schedule: CronSchedule,
    next_fire: Option<DateTime<Utc>>,
}

pub struct WorkflowScheduler {
    engine: WorkflowEngine,
    config: SchedulerConfig,
    entries: Mutex<HashMap<Uuid, ScheduleEntry>>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl WorkflowScheduler {
    pub fn new(engine: WorkflowEngine, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            entries: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Spawn the tick loop. Calling `start` on a running scheduler is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.tick());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        scheduler.tick(Utc::now()).await;
                    }
                }
            }
            debug!("scheduler loop exited");
        });

        info!(tick_ms = self.config.tick_ms, "scheduler started");
        *running = Some((cancel, handle));
    }

    /// Cancel the tick loop and wait for it to exit.
    pub async fn stop(&self) {
        let Some((cancel, handle)) = self.running.lock().take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "scheduler loop ended abnormally");
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Next computed fire time for `workflow_id`, if it is scheduled.
    pub fn next_fire_time(&self, workflow_id: Uuid) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .get(&workflow_id)
            .and_then(|entry| entry.next_fire)
    }

    /// Evaluate every schedule against `now` and trigger the ones that are due.
    ///
    /// A workflow seen for the first time (or whose expression changed) only
    /// gets its next fire time computed; missed fires collapse into one.
    /// Returns the ids that were fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let workflows = match self.engine.list_workflows().await {
            Ok(workflows) => workflows,
            Err(e) => {
                warn!(error = %e, "scheduler could not list workflows");
                return Vec::new();
            }
        };

        let mut due = Vec::new();
        {
            let mut entries = self.entries.lock();
            let mut seen = HashSet::new();

            for workflow in workflows.iter().filter(|wf| wf.enabled) {
                let Trigger::Schedule { expression } = &workflow.trigger else {
                    continue;
                };
                seen.insert(workflow.id);

                let known = entries
                    .get(&workflow.id)
                    .is_some_and(|entry| entry.schedule.expression() == expression.trim());
                if !known {
                    match CronSchedule::parse(expression) {
                        Ok(schedule) => {
                            let next_fire = schedule.next_after(now);
                            debug!(workflow_id = %workflow.id, next_fire = ?next_fire, "schedule registered");
                            entries.insert(workflow.id, ScheduleEntry { schedule, next_fire });
                        }
                        Err(e) => {
                            entries.remove(&workflow.id);
                            warn!(workflow_id = %workflow.id, error = %e, "ignoring unparsable schedule");
                        }
                    }
                    continue;
                }

                let Some(entry) = entries.get_mut(&workflow.id) else {
                    continue;
                };

                if entry.next_fire.is_some_and(|at| at <= now) {
                    due.push(workflow.id);
                    entry.next_fire = entry.schedule.next_after(now);
                }
            }

            entries.retain(|id, _| seen.contains(id));
        }

        for id in &due {
            match self
                .engine
                .trigger(*id, json!({}), ExecutionReason::Scheduled)
            {
                Ok(execution_id) => {
                    info!(workflow_id = %id, execution_id = %execution_id, "scheduled fire")
                }
                Err(e) => warn!(workflow_id = %id, error = %e, "scheduled fire rejected"),
            }
        }

        due
    }
}
