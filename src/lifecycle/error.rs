//! Domain-specific error types for sandbox lifecycle operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. The API layer maps each
//! variant to a distinct response code.

use std::time::Duration;

/// Errors that can occur while managing a user's sandbox.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Container runtime is not installed or not reachable.
    #[error("Container runtime is not available: {message}")]
    RuntimeUnavailable { message: String },

    /// A runtime call exceeded its timeout bound.
    #[error("Runtime call '{operation}' timed out after {timeout_secs} seconds")]
    RuntimeTimeout {
        operation: String,
        timeout_secs: u64,
    },

    /// Sandbox image could not be found or pulled.
    #[error("Sandbox image unavailable: {image}: {message}")]
    ImageUnavailable { image: String, message: String },

    /// Shared bridge network could not be created.
    #[error("Network setup failed: {message}")]
    NetworkSetupFailed { message: String },

    /// Runtime refused to create the container (bad mount, port conflict).
    #[error("Container creation rejected: {message}")]
    CreationRejected { message: String },

    /// No free port left in the configured range.
    #[error("Port pool exhausted: no free port in {base_port}..={max_port}")]
    PoolExhausted { base_port: u16, max_port: u16 },

    /// A required precondition does not hold (e.g. workspace missing).
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Operation addressed a user with no sandbox.
    #[error("No sandbox found for user {user_id}")]
    NotFound { user_id: i64 },

    /// Persistence layer failure while reading or writing lease state.
    #[error("Lease store error: {message}")]
    Store { message: String },

    /// The daemon refused a non-creation call (stop, remove, inspect, list).
    #[error("Runtime call '{operation}' failed: {message}")]
    RuntimeFailed { operation: String, message: String },
}

impl LifecycleError {
    /// Creates a `RuntimeUnavailable` error.
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `RuntimeTimeout` error for a named operation.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::RuntimeTimeout {
            operation: operation.into(),
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `ImageUnavailable` error.
    pub fn image_unavailable(image: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImageUnavailable {
            image: image.into(),
            message: message.into(),
        }
    }

    /// Creates a `NetworkSetupFailed` error.
    pub fn network_setup_failed(message: impl Into<String>) -> Self {
        Self::NetworkSetupFailed {
            message: message.into(),
        }
    }

    /// Creates a `CreationRejected` error.
    pub fn creation_rejected(message: impl Into<String>) -> Self {
        Self::CreationRejected {
            message: message.into(),
        }
    }

    /// Creates a `PreconditionFailed` error.
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Creates a `Store` error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a `RuntimeFailed` error for a named operation.
    pub fn runtime_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RuntimeTimeout { .. })
    }

    /// Returns true if this is a runtime unavailability error.
    pub fn is_runtime_unavailable(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable { .. })
    }

    /// Returns true if this is a pool exhaustion error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Returns true if this is a not-found error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
