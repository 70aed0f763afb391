//! Error taxonomy shared by backends, stores, and coordinators.
//!
//! Three layers:
//! - [`EmbedError`]: what a [`ModelBackend`](crate::backend::ModelBackend) or
//!   the model router can report.
//! - [`StoreError`]: what a [`VectorIndex`](crate::store::VectorIndex) or
//!   [`MetadataStore`](crate::store::MetadataStore) can report.
//! - [`IndexError`]: what the ingestion and query coordinators surface to
//!   their callers.
//!
//! Retryability is a property of the variant, never of the message text.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by an embedding backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    /// Rate limited, network failure, 5xx. Safe to retry.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Malformed input or a non-recoverable quota condition.
    #[error("permanent embedding failure: {0}")]
    Permanent(String),

    /// Unknown model, missing credential, unsupported engine.
    #[error("embedding configuration error: {0}")]
    Configuration(String),

    /// The backend's admission queue is full.
    #[error("backpressure: admission queue for model `{model}` is full")]
    Backpressure { model: String },

    /// A single call exceeded its deadline.
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Transient(_) | EmbedError::Timeout(_))
    }
}

/// Failure reported by the vector index or the metadata store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Temporarily unreachable or busy. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (e.g. dimension mismatch). Not retried.
    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Error surfaced by the coordinators and the service facade.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    /// Fatal binding problem; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Retries were exhausted on an embedding or store call.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Bad input or a store rejection; never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("backpressure: {0}")]
    Backpressure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository `{0}` is inactive")]
    RepositoryInactive(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<EmbedError> for IndexError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Transient(_) | EmbedError::Timeout(_) => {
                IndexError::Transient(err.to_string())
            }
            EmbedError::Permanent(_) => IndexError::Permanent(err.to_string()),
            EmbedError::Configuration(msg) => IndexError::Configuration(msg),
            EmbedError::Backpressure { .. } => IndexError::Backpressure(err.to_string()),
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                IndexError::Transient(err.to_string())
            }
            StoreError::Rejected(_) | StoreError::Conflict(_) => {
                IndexError::Permanent(err.to_string())
            }
            StoreError::NotFound(msg) => IndexError::NotFound(msg),
        }
    }
}

pub type EmbedResult<T> = std::result::Result<T, EmbedError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type IndexResult<T> = std::result::Result<T, IndexError>;
