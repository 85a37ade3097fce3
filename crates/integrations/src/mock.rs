//! `MockAdapter`: a test double for `AdapterCapability`.
//!
//! Useful in unit and integration tests where a real service is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{ActionContext, ActionKind, AdapterCapability, IntegrationCredentials, IntegrationError};

/// Behaviour injected into `MockAdapter` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the rendered params unchanged.
    Echo,
    /// Fail every call with a `Request` error.
    FailRequest(String),
    /// Reject authentication, and fail every call with an `Auth` error.
    RejectAuth(String),
    /// Fail the first `failures` calls with a `Request` error, then return `value`.
    FailTimes { failures: u32, value: Value },
    /// Sleep before returning `value`.
    Delay { delay: Duration, value: Value },
}

/// One recorded invocation of `execute_action`.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub kind: ActionKind,
    pub params: Value,
    pub action_id: String,
    pub attempt: u32,
}

/// A mock adapter that records every call it receives and returns a
/// programmer-specified result.
pub struct MockAdapter {
    /// Service label used in error messages.
    pub name: String,
    /// What the adapter will do when `execute_action` is called.
    pub behaviour: MockBehaviour,
    calls: Mutex<Vec<MockCall>>,
    auth_calls: AtomicU32,
}

impl MockAdapter {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Mutex::new(Vec::new()),
            auth_calls: AtomicU32::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that returns its params.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Echo)
    }

    /// Create a mock whose calls always fail with a retryable `Request` error.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRequest(msg.into()))
    }

    /// Create a mock whose credentials are always rejected.
    pub fn rejecting_auth(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::RejectAuth(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: u32, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailTimes { failures, value })
    }

    /// Create a mock that sleeps for `delay` before succeeding.
    pub fn slow(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Delay { delay, value })
    }

    /// Number of times `execute_action` has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of times `authenticate` has been invoked.
    pub fn auth_count(&self) -> u32 {
        self.auth_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterCapability for MockAdapter {
    async fn authenticate(&self, _credentials: &IntegrationCredentials) -> Result<(), IntegrationError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            MockBehaviour::RejectAuth(msg) => Err(IntegrationError::auth(&self.name, msg.clone())),
            _ => Ok(()),
        }
    }

    async fn test_connection(&self, _credentials: &IntegrationCredentials) -> bool {
        !matches!(
            self.behaviour,
            MockBehaviour::FailRequest(_) | MockBehaviour::RejectAuth(_)
        )
    }

    async fn execute_action(
        &self,
        kind: ActionKind,
        params: &Value,
        ctx: &ActionContext,
    ) -> Result<Value, IntegrationError> {
        let seen = {
            let mut calls = self.calls.lock();
            calls.push(MockCall {
                kind,
                params: params.clone(),
                action_id: ctx.action_id.clone(),
                attempt: ctx.attempt,
            });
            calls.len() as u32
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Echo => Ok(params.clone()),
            MockBehaviour::FailRequest(msg) => Err(IntegrationError::request(&self.name, msg.clone())),
            MockBehaviour::RejectAuth(msg) => Err(IntegrationError::auth(&self.name, msg.clone())),
            MockBehaviour::FailTimes { failures, value } => {
                if seen <= *failures {
                    Err(IntegrationError::request(
                        &self.name,
                        format!("simulated failure {seen}/{failures}"),
                    ))
                } else {
                    Ok(value.clone())
                }
            }
            MockBehaviour::Delay { delay, value } => {
                tokio::time::sleep(*delay).await;
                Ok(value.clone())
            }
        }
    }
}
