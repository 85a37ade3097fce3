//! `IntegrationRegistry`: process-wide catalog of service adapters.
//!
//! Each service name maps to an immutable entry (adapter + credentials). Writes
//! swap the whole entry under the table's write lock, so a concurrent `resolve`
//! observes either the previous pair or the new one, never a mix of the two.
//!
//! The registry is constructed explicitly and handed to the engine and the
//! scheduler; there is no global instance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{AdapterCapability, CredentialProvider, IntegrationCredentials, IntegrationError};

struct Entry {
    adapter: Arc<dyn AdapterCapability>,
    credentials: IntegrationCredentials,
    registered_at: DateTime<Utc>,
}

/// A snapshot of one registration, as returned by [`IntegrationRegistry::resolve`].
///
/// Cheap to clone; stays valid even if the service is re-registered afterwards.
#[derive(Clone)]
pub struct ResolvedIntegration {
    service: String,
    entry: Arc<Entry>,
}

impl ResolvedIntegration {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn adapter(&self) -> &Arc<dyn AdapterCapability> {
        &self.entry.adapter
    }

    pub fn credentials(&self) -> &IntegrationCredentials {
        &self.entry.credentials
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.entry.registered_at
    }
}

impl std::fmt::Debug for ResolvedIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedIntegration")
            .field("service", &self.service)
            .field("credentials", &self.entry.credentials)
            .field("registered_at", &self.entry.registered_at)
            .finish()
    }
}

#[derive(Default)]
pub struct IntegrationRegistry {
    entries: RwLock<HashMap<String, Arc<Entry>>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for `service`.
    ///
    /// Re-registering is how credentials are rotated: in-flight calls keep the
    /// entry they resolved, new calls see the replacement.
    pub fn register(
        &self,
        service: impl Into<String>,
        adapter: Arc<dyn AdapterCapability>,
        credentials: IntegrationCredentials,
    ) {
        let service = service.into();
        let entry = Arc::new(Entry {
            adapter,
            credentials,
            registered_at: Utc::now(),
        });
        let replaced = self.entries.write().insert(service.clone(), entry).is_some();
        if replaced {
            info!(service = %service, "integration re-registered");
        } else {
            info!(service = %service, "integration registered");
        }
    }

    /// Authenticate first, then register. A failing adapter never replaces a
    /// working one.
    pub async fn register_authenticated(
        &self,
        service: impl Into<String>,
        adapter: Arc<dyn AdapterCapability>,
        credentials: IntegrationCredentials,
    ) -> Result<(), IntegrationError> {
        let service = service.into();
        adapter.authenticate(&credentials).await?;
        self.register(service, adapter, credentials);
        Ok(())
    }

    /// # Errors
    /// [`IntegrationError::UnknownService`] if nothing is registered under `service`.
    pub fn resolve(&self, service: &str) -> Result<ResolvedIntegration, IntegrationError> {
        let entry = self
            .entries
            .read()
            .get(service)
            .cloned()
            .ok_or_else(|| IntegrationError::UnknownService(service.to_owned()))?;

        Ok(ResolvedIntegration {
            service: service.to_owned(),
            entry,
        })
    }

    /// Registered service names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, service: &str) -> bool {
        let removed = self.entries.write().remove(service).is_some();
        if removed {
            info!(service = %service, "integration unregistered");
        }
        removed
    }

    pub fn contains(&self, service: &str) -> bool {
        self.entries.read().contains_key(service)
    }

    pub async fn test_connection(&self, service: &str) -> Result<bool, IntegrationError> {
        let resolved = self.resolve(service)?;
        Ok(resolved
            .adapter()
            .test_connection(resolved.credentials())
            .await)
    }

    /// Pull fresh credentials for every registered service from `provider` and
    /// swap them in. Services the provider knows nothing about keep their
    /// current credentials. Returns the names that were updated.
    pub async fn refresh_credentials(&self, provider: &dyn CredentialProvider) -> Vec<String> {
        let mut refreshed = Vec::new();

        for service in self.list() {
            let Some(credentials) = provider.credentials(&service).await else {
                debug!(service = %service, "no credentials from provider; keeping current");
                continue;
            };

            let mut entries = self.entries.write();
            // The service may have been unregistered while we were awaiting.
            let Some(current) = entries.get(&service).cloned() else {
                warn!(service = %service, "service vanished during credential refresh");
                continue;
            };
            entries.insert(
                service.clone(),
                Arc::new(Entry {
                    adapter: current.adapter.clone(),
                    credentials,
                    registered_at: Utc::now(),
                }),
            );
            refreshed.push(service);
        }

        refreshed
    }

    /// Drop every registration. Used at teardown.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use crate::{ActionContext, ActionKind, StaticCredentialProvider};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(credentials: IntegrationCredentials) -> ActionContext {
        ActionContext {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            action_id: "a".into(),
            attempt: 1,
            credentials,
        }
    }

    #[test]
    fn resolve_unknown_service_fails() {
        let registry = IntegrationRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(IntegrationError::UnknownService(name)) if name == "nope"
        ));
    }

    #[test]
    fn list_is_sorted_and_unregister_removes() {
        let registry = IntegrationRegistry::new();
        registry.register("slack", Arc::new(MockAdapter::returning("slack", json!({}))), IntegrationCredentials::new("slack"));
        registry.register("gmail", Arc::new(MockAdapter::returning("gmail", json!({}))), IntegrationCredentials::new("gmail"));

        assert_eq!(registry.list(), vec!["gmail", "slack"]);
        assert!(registry.unregister("gmail"));
        assert!(!registry.unregister("gmail"));
        assert_eq!(registry.list(), vec!["slack"]);
    }

    #[tokio::test]
    async fn re_register_swaps_adapter_but_old_handle_stays_usable() {
        let registry = IntegrationRegistry::new();
        let old = Arc::new(MockAdapter::returning("v1", json!({ "version": 1 })));
        let new = Arc::new(MockAdapter::returning("v2", json!({ "version": 2 })));

        registry.register("crm", old.clone(), IntegrationCredentials::new("crm").with("key", "old"));
        let held = registry.resolve("crm").unwrap();

        registry.register("crm", new.clone(), IntegrationCredentials::new("crm").with("key", "new"));
        let fresh = registry.resolve("crm").unwrap();

        // The earlier handle keeps a consistent (adapter, credentials) pair.
        assert_eq!(held.credentials().get("key"), Some("old"));
        let out = held
            .adapter()
            .execute_action(ActionKind::ApiCall, &json!({}), &ctx(held.credentials().clone()))
            .await
            .unwrap();
        assert_eq!(out["version"], 1);

        assert_eq!(fresh.credentials().get("key"), Some("new"));
        let out = fresh
            .adapter()
            .execute_action(ActionKind::ApiCall, &json!({}), &ctx(fresh.credentials().clone()))
            .await
            .unwrap();
        assert_eq!(out["version"], 2);
        assert_eq!(old.call_count(), 1);
        assert_eq!(new.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_authentication_keeps_previous_registration() {
        let registry = IntegrationRegistry::new();
        let good = Arc::new(MockAdapter::returning("good", json!({})));
        registry.register("mail", good, IntegrationCredentials::new("mail").with("key", "good"));

        let bad = Arc::new(MockAdapter::rejecting_auth("bad", "invalid token"));
        let err = registry
            .register_authenticated("mail", bad, IntegrationCredentials::new("mail").with("key", "bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, IntegrationError::Auth { .. }));
        let current = registry.resolve("mail").unwrap();
        assert_eq!(current.credentials().get("key"), Some("good"));
    }

    #[tokio::test]
    async fn refresh_credentials_rotates_known_services_only() {
        let registry = IntegrationRegistry::new();
        registry.register("a", Arc::new(MockAdapter::returning("a", json!({}))), IntegrationCredentials::new("a").with("k", "1"));
        registry.register("b", Arc::new(MockAdapter::returning("b", json!({}))), IntegrationCredentials::new("b").with("k", "1"));

        let provider = StaticCredentialProvider::new();
        provider.insert(IntegrationCredentials::new("a").with("k", "2"));

        let refreshed = registry.refresh_credentials(&provider).await;
        assert_eq!(refreshed, vec!["a"]);
        assert_eq!(registry.resolve("a").unwrap().credentials().get("k"), Some("2"));
        assert_eq!(registry.resolve("b").unwrap().credentials().get("k"), Some("1"));
    }

    #[tokio::test]
    async fn concurrent_resolves_during_registration_see_whole_entries() {
        let registry = Arc::new(IntegrationRegistry::new());
        registry.register("svc", Arc::new(MockAdapter::returning("v0", json!({}))), IntegrationCredentials::new("svc").with("gen", "0"));

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for generation in 1..200 {
                    registry.register(
                        "svc",
                        Arc::new(MockAdapter::returning(format!("v{generation}"), json!({}))),
                        IntegrationCredentials::new("svc").with("gen", generation.to_string()),
                    );
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..500 {
            let resolved = registry.resolve("svc").unwrap();
            assert!(resolved.credentials().get("gen").is_some());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(registry.resolve("svc").unwrap().credentials().get("gen"), Some("199"));
    }
}
