//! Concrete [`ModelBackend`] implementations.
//!
//! | `backend` | Type | Notes |
//! |-----------|------|-------|
//! | `"local"` | [`LocalBackend`] | in-process; `hashing` engine or fastembed (feature-gated) |
//! | `"remote"` | [`RemoteBackend`] | OpenAI-compatible or Ollama HTTP API |
//!
//! Backends make exactly one attempt per call. Retry, backoff, and admission
//! control belong to [`crate::router::ModelRouter`].

pub mod local;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use docindex_core::backend::ModelBackend;
use docindex_core::error::EmbedResult;

use crate::config::{BackendType, ModelConfig};

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// Build the backend described by a `[[models]]` entry.
///
/// Fails with `EmbedError::Configuration` when the backend cannot be bound,
/// e.g. an unknown local engine or a missing API credential.
pub fn build_backend(config: &ModelConfig, request_timeout: Duration) -> EmbedResult<Arc<dyn ModelBackend>> {
    match config.backend {
        BackendType::Local => Ok(Arc::new(LocalBackend::new(config)?)),
        BackendType::Remote => Ok(Arc::new(RemoteBackend::new(config, request_timeout)?)),
    }
}
