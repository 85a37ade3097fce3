//! Bounded, in-memory history of finished runs.
//!
//! The newest [`EXECUTION_LOG_CAPACITY`] records are kept; appending past the
//! bound evicts the oldest. Every append is also broadcast to subscribers.

use std::collections::VecDeque;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ExecutionRecord;

pub const EXECUTION_LOG_CAPACITY: usize = 1_000;

const NOTIFY_CAPACITY: usize = 256;

pub struct ExecutionLog {
    records: RwLock<VecDeque<ExecutionRecord>>,
    capacity: usize,
    notify: broadcast::Sender<ExecutionRecord>,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::with_capacity(EXECUTION_LOG_CAPACITY)
    }
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(EXECUTION_LOG_CAPACITY))),
            capacity: capacity.max(1),
            notify,
        }
    }

    pub fn append(&self, record: ExecutionRecord) {
        {
            let mut records = self.records.write();
            while records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record.clone());
        }
        // No subscribers is fine.
        let _ = self.notify.send(record);
    }

    /// Most recent first, optionally filtered to one workflow.
    pub fn query(&self, workflow_id: Option<Uuid>, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let records = self.records.read();
        records
            .iter()
            .rev()
            .filter(|r| workflow_id.map_or(true, |id| r.workflow_id == id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn get(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receive every record appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionRecord> {
        self.notify.subscribe()
    }
}
