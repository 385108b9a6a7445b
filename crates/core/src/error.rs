//! Error types for AgentHub.
//!
//! Authorization denials, conflict rejections, and missing keys are ordinary
//! outcomes and are returned as values (`false`, `None`, empty list), never
//! as errors. The variants here cover backend and infrastructure failures
//! only: an unreachable store must never be mistaken for an absent key.

use thiserror::Error;

/// Result type alias using AgentHub's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the coordination layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a backend-unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
