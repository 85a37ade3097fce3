//! Integration-level error type.

use thiserror::Error;

/// Errors raised by the registry or returned by an adapter call.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Request`       : transient; eligible for the action's retry policy.
/// - `Auth`          : credentials were rejected; retrying will not help.
/// - `UnknownService`: nothing is registered under that name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    /// `resolve` was called for a service that has no registered adapter.
    #[error("unknown service: '{0}'")]
    UnknownService(String),

    /// The adapter rejected its credentials.
    #[error("authentication failed for '{service}': {message}")]
    Auth { service: String, message: String },

    /// The adapter call failed (network, remote error, timeout).
    #[error("request to '{service}' failed: {message}")]
    Request { service: String, message: String },
}

impl IntegrationError {
    pub fn auth(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn request(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a retry policy may re-invoke the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request { .. })
    }
}
