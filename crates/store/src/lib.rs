//! `store` crate: pure persistence layer.
//!
//! Defines the [`WorkflowStore`] contract the engine is handed, the row structs
//! it persists, and two implementations: an in-memory map and a directory of
//! JSON files. No business logic lives here; definitions are stored as opaque
//! JSON and decoded by the engine.

pub mod error;
pub mod file;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use models::{TemplateRow, WorkflowRow};
pub use repository::WorkflowStore;
