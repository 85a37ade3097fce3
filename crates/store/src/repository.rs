//! The `WorkflowStore` contract: one method per persistence operation.
//!
//! Every method returns `Result<T, StoreError>`. No business logic, no
//! domain types.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{StoreError, TemplateRow, WorkflowRow};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace the row keyed by `row.id`.
    async fn save_workflow(&self, row: WorkflowRow) -> Result<(), StoreError>;

    /// Returns `StoreError::NotFound` if no such row exists.
    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError>;

    /// Returns `StoreError::NotFound` if nothing was deleted.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError>;

    /// All workflows, newest first.
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError>;

    async fn save_template(&self, row: TemplateRow) -> Result<(), StoreError>;

    async fn load_template(&self, id: Uuid) -> Result<TemplateRow, StoreError>;

    async fn delete_template(&self, id: Uuid) -> Result<(), StoreError>;

    /// All templates, newest first.
    async fn list_templates(&self) -> Result<Vec<TemplateRow>, StoreError>;
}
