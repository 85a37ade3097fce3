//! Directory-of-JSON-files `WorkflowStore`.
//!
//! Layout under the root directory:
//!
//! ```text
//! workflows/<uuid>.json
//! templates/<uuid>.json
//! ```
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never sees a half-written row.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{StoreError, TemplateRow, WorkflowRow, WorkflowStore};

const WORKFLOWS_DIR: &str = "workflows";
const TEMPLATES_DIR: &str = "templates";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(WORKFLOWS_DIR)).await?;
        fs::create_dir_all(root.join(TEMPLATES_DIR)).await?;
        info!("Opened workflow store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, dir: &str, id: Uuid) -> PathBuf {
        self.root.join(dir).join(format!("{id}.json"))
    }

    async fn write_row<T: Serialize>(&self, dir: &str, id: Uuid, row: &T) -> Result<(), StoreError> {
        let path = self.path_for(dir, id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(row)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_row<T: DeserializeOwned>(&self, dir: &str, id: Uuid) -> Result<T, StoreError> {
        let path = self.path_for(dir, id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn remove_row(&self, dir: &str, id: Uuid) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(dir, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Unreadable files are logged and skipped so one bad file does not hide
    /// every other definition.
    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        let mut entries = fs::read_dir(self.root.join(dir)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .await
                .map_err(StoreError::from)
                .and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(StoreError::from));
            match parsed {
                Ok(row) => rows.push(row),
                Err(e) => warn!("skipping unreadable row {}: {e}", path.display()),
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn save_workflow(&self, row: WorkflowRow) -> Result<(), StoreError> {
        self.write_row(WORKFLOWS_DIR, row.id, &row).await
    }

    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        self.read_row(WORKFLOWS_DIR, id).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        self.remove_row(WORKFLOWS_DIR, id).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError> {
        let mut rows: Vec<WorkflowRow> = self.read_all(WORKFLOWS_DIR).await?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn save_template(&self, row: TemplateRow) -> Result<(), StoreError> {
        self.write_row(TEMPLATES_DIR, row.id, &row).await
    }

    async fn load_template(&self, id: Uuid) -> Result<TemplateRow, StoreError> {
        self.read_row(TEMPLATES_DIR, id).await
    }

    async fn delete_template(&self, id: Uuid) -> Result<(), StoreError> {
        self.remove_row(TEMPLATES_DIR, id).await
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRow>, StoreError> {
        let mut rows: Vec<TemplateRow> = self.read_all(TEMPLATES_DIR).await?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
