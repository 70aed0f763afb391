//! The embedding capability.
//!
//! A [`ModelBackend`] turns an ordered batch of texts into an ordered batch of
//! fixed-length vectors. Concrete backends (local in-process inference,
//! remote HTTP APIs) live in the `docindex` app crate; the model router wraps
//! them with admission control and retries.

use async_trait::async_trait;

use crate::error::EmbedResult;

/// Where a backend executes, which decides its admission defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process inference: bounded latency, no caller-visible rate limit.
    Local,
    /// Network API: variable latency and a rate limit the router must respect.
    Remote,
}

/// A capability that embeds text.
///
/// # Contract
///
/// - `embed(batch)` returns exactly `batch.len()` vectors, in input order,
///   each of length [`dims`](ModelBackend::dims).
/// - `batch` is non-empty, contains no blank items, and is at most
///   [`max_batch`](ModelBackend::max_batch) long. The router guarantees this.
/// - Retryable problems are reported as `EmbedError::Transient`; the
///   backend itself never retries.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Model identifier this backend was bound under.
    fn model_id(&self) -> &str;

    /// Output dimensionality.
    fn dims(&self) -> usize;

    /// Largest batch a single `embed` call accepts.
    fn max_batch(&self) -> usize;

    fn kind(&self) -> BackendKind;

    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>>;
}
