//! `integrations` crate: the adapter capability contract, credentials, and
//! the `IntegrationRegistry` that maps service names to adapters.
//!
//! Every external service, built-in and third-party alike, is reached through
//! [`AdapterCapability`]. The engine only ever talks to adapters it resolved
//! from the registry.

pub mod adapter;
pub mod builtin;
pub mod credentials;
pub mod error;
pub mod mock;
pub mod registry;

pub use adapter::{ActionContext, ActionKind, AdapterCapability};
pub use credentials::{CredentialProvider, IntegrationCredentials, StaticCredentialProvider};
pub use error::IntegrationError;
pub use registry::{IntegrationRegistry, ResolvedIntegration};
