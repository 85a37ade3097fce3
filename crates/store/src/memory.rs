//! In-memory `WorkflowStore`.
//!
//! Stores everything in process memory with the same semantics as the file
//! store. Used by tests and by `serve` when no workflows directory is given.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{StoreError, TemplateRow, WorkflowRow, WorkflowStore};

#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<Uuid, WorkflowRow>>,
    templates: RwLock<HashMap<Uuid, TemplateRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn save_workflow(&self, row: WorkflowRow) -> Result<(), StoreError> {
        self.workflows.write().insert(row.id, row);
        Ok(())
    }

    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        self.workflows
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError> {
        let mut rows: Vec<WorkflowRow> = self.workflows.read().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn save_template(&self, row: TemplateRow) -> Result<(), StoreError> {
        self.templates.write().insert(row.id, row);
        Ok(())
    }

    async fn load_template(&self, id: Uuid) -> Result<TemplateRow, StoreError> {
        self.templates
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete_template(&self, id: Uuid) -> Result<(), StoreError> {
        self.templates
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRow>, StoreError> {
        let mut rows: Vec<TemplateRow> = self.templates.read().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let store = InMemoryStore::new();
        let row = WorkflowRow::new(Uuid::new_v4(), "digest", json!({ "k": 1 }));
        store.save_workflow(row.clone()).await.unwrap();

        assert_eq!(store.load_workflow(row.id).await.unwrap(), row);
        store.delete_workflow(row.id).await.unwrap();
        assert!(matches!(
            store.load_workflow(row.id).await,
            Err(StoreError::NotFound(id)) if id == row.id
        ));
        assert!(store.delete_workflow(row.id).await.is_err());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryStore::new();
        let mut older = WorkflowRow::new(Uuid::new_v4(), "older", json!({}));
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = WorkflowRow::new(Uuid::new_v4(), "newer", json!({}));

        store.save_workflow(older).await.unwrap();
        store.save_workflow(newer).await.unwrap();

        let names: Vec<String> = store
            .list_workflows()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);
    }
}
