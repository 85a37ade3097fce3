//! Row structs persisted by a [`WorkflowStore`](crate::WorkflowStore).
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate, which serialises a `Workflow`
//! into `definition`. Builder-canvas layout never reaches these rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// Full JSON workflow definition (trigger, actions, flags, ...)
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn new(id: Uuid, name: impl Into<String>, definition: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            definition,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// templates
// ---------------------------------------------------------------------------

/// A reusable workflow definition that new workflows are stamped from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
