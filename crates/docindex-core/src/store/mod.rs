//! Storage abstractions for docindex.
//!
//! Two independently failing systems sit behind these traits:
//!
//! - [`VectorIndex`]: the system of record for vectors, keyed by vector id
//!   inside a namespace (a repository's index binding).
//! - [`MetadataStore`]: the system of record for repositories, documents,
//!   and their indexing status.
//!
//! There is no shared transaction between them. The coordinators keep them
//! consistent through write ordering and idempotent keys, so implementations
//! only need per-call atomicity and internal thread safety.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::models::{Document, DocumentStatus, Filter, IndexEntry, Page, Repository, VectorHit};

/// Vector index store contract.
///
/// | Method | Semantics |
/// |--------|-----------|
/// | [`upsert`](VectorIndex::upsert) | insert or overwrite by vector id |
/// | [`query`](VectorIndex::query) | cosine top-k, score desc then vector id asc |
/// | [`get`](VectorIndex::get) | fetch entries by id, missing ids skipped |
/// | [`delete`](VectorIndex::delete) | remove by id, returns how many existed |
/// | [`count`](VectorIndex::count) | number of entries in a namespace |
///
/// A write whose vector length differs from the namespace's existing
/// dimensionality fails with `StoreError::Rejected` and writes nothing.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> StoreResult<()>;

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<VectorHit>>;

    async fn get(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<Vec<IndexEntry>>;

    async fn delete(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<usize>;

    async fn count(&self, namespace: &str) -> StoreResult<usize>;

    /// Backend name for logs (e.g. `"sqlite"`, `"memory"`).
    fn name(&self) -> &str;
}

/// Durable metadata store contract.
///
/// Every method commits before returning `Ok`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the document row keyed by `doc.id`.
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()>;

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Update status and `updated_at`. `NotFound` if the row is gone.
    async fn set_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()>;

    /// Remove the row. Returns whether a row existed.
    async fn delete_document(&self, id: &str) -> StoreResult<bool>;

    /// Documents of a repository ordered by `created_at`, then `id`.
    async fn list_by_repository(&self, repository: &str, page: Page) -> StoreResult<Vec<Document>>;

    /// Documents in any of `statuses` last updated at or before `updated_before`.
    async fn list_by_status(
        &self,
        statuses: &[DocumentStatus],
        updated_before: i64,
        limit: usize,
    ) -> StoreResult<Vec<Document>>;

    async fn count_by_repository(&self, repository: &str) -> StoreResult<usize>;

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<()>;

    async fn get_repository(&self, name: &str) -> StoreResult<Option<Repository>>;

    async fn list_repositories(&self) -> StoreResult<Vec<Repository>>;

    /// Soft (de)activation. `NotFound` if the repository is unknown.
    async fn set_repository_active(&self, name: &str, active: bool) -> StoreResult<()>;
}

/// Sort hits by score descending, breaking ties by ascending vector id.
///
/// Shared by every [`VectorIndex`] implementation so ordering is identical
/// across backends.
pub fn rank_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.vector_id.cmp(&b.vector_id))
    });
}

/// Check that every entry matches the namespace's dimensionality (or each
/// other, for an empty namespace).
pub fn check_dimensions(existing: Option<usize>, entries: &[IndexEntry]) -> StoreResult<()> {
    let expected = existing.or_else(|| entries.first().map(|e| e.vector.len()));
    if let Some(expected) = expected {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Err(StoreError::Rejected(format!(
                "dimension mismatch for {}: expected {}, got {}",
                bad.vector_id,
                expected,
                bad.vector.len()
            )));
        }
    }
    Ok(())
}
