//! Document ingestion and deletion.
//!
//! Implements the per-document state machine
//!
//! ```text
//! pending ──► embedding ──► indexed
//!                 │
//!                 └──► failed(reason)
//! ```
//!
//! with the ordered-write protocol that keeps the metadata store and the
//! vector index consistent without a shared transaction:
//!
//! 1. Upsert the metadata row as `pending`, then mark it `embedding`.
//! 2. Chunk deterministically from the stored content and policy.
//! 3. Reuse vectors already in the index for unchanged chunks; embed the rest.
//! 4. Upsert every entry (idempotent by vector id, retried).
//! 5. Only then flip the row to `indexed`.
//!
//! A crash anywhere before step 5 leaves the row in `embedding`, which the
//! reconciler re-runs. Delete mirrors the order: vectors first, then the row.
//!
//! Every pipeline for a document id runs under that id's ownership token, so
//! concurrent submissions of the same content commit at most once.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use docindex_core::chunk::{chunk_document, document_id, vector_ids};
use docindex_core::error::{EmbedError, IndexError, IndexResult, StoreError, StoreResult};
use docindex_core::models::{
    Chunk, ChunkPolicy, Document, DocumentStatus, EntryPayload, FailureReason, IndexEntry,
    Metadata, Repository,
};
use docindex_core::store::{MetadataStore, VectorIndex};

use crate::locks::{DocumentGuard, DocumentLocks};
use crate::router::{ModelRouter, RetryPolicy};

/// A submission to [`IngestionCoordinator::ingest`].
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub repository: String,
    pub content: String,
    pub metadata: Metadata,
    /// Caller-supplied byte offsets into the normalised content. Overrides
    /// the repository's chunking policy for this document.
    pub boundaries: Option<Vec<usize>>,
}

impl IngestRequest {
    pub fn new(repository: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_boundaries(mut self, offsets: Vec<usize>) -> Self {
        self.boundaries = Some(offsets);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    /// Chunks sent to the model backend in this call.
    pub embedded: usize,
    /// Chunks whose existing vectors were reused.
    pub reused: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub document_id: String,
    pub vectors_removed: usize,
}

/// A pipeline error together with the durable status it maps to.
struct PipelineFailure {
    reason: FailureReason,
    error: IndexError,
}

fn embed_failure(err: EmbedError) -> PipelineFailure {
    let reason = match &err {
        EmbedError::Transient(_) | EmbedError::Timeout(_) => FailureReason::EmbeddingTransient,
        EmbedError::Backpressure { .. } => FailureReason::Backpressure,
        EmbedError::Permanent(_) | EmbedError::Configuration(_) => {
            FailureReason::EmbeddingPermanent
        }
    };
    PipelineFailure {
        reason,
        error: err.into(),
    }
}

fn store_failure(err: StoreError) -> PipelineFailure {
    let reason = match &err {
        StoreError::Rejected(_) | StoreError::Conflict(_) | StoreError::NotFound(_) => {
            FailureReason::StoreRejected
        }
        StoreError::Unavailable(_) | StoreError::Timeout(_) => FailureReason::StoreUnavailable,
    };
    PipelineFailure {
        reason,
        error: err.into(),
    }
}

/// Run a store call under `policy`: each attempt gets `attempt_timeout`,
/// retryable failures back off and try again up to `max_retries` times.
pub(crate) async fn with_store_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut call: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(policy.attempt_timeout)),
        };
        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(op, attempt, ?delay, error = %e, "store call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct IngestionCoordinator {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    router: Arc<ModelRouter>,
    locks: Arc<DocumentLocks>,
    store_retry: RetryPolicy,
}

impl IngestionCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorIndex>,
        router: Arc<ModelRouter>,
        locks: Arc<DocumentLocks>,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            metadata,
            vectors,
            router,
            locks,
            store_retry,
        }
    }

    async fn repository(&self, name: &str) -> IndexResult<Repository> {
        with_store_retry(&self.store_retry, "get_repository", || {
            self.metadata.get_repository(name)
        })
        .await?
        .ok_or_else(|| IndexError::NotFound(format!("repository {}", name)))
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        with_store_retry(&self.store_retry, "set_status", || {
            self.metadata.set_status(id, status)
        })
        .await
    }

    /// Ingest one document and drive it to `indexed`.
    ///
    /// Re-submitting content that is already `indexed` returns immediately
    /// without calling the model backend. On failure the row is left as
    /// `failed(reason)` and the error is returned.
    pub async fn ingest(&self, request: IngestRequest) -> IndexResult<IngestOutcome> {
        if request.content.trim().is_empty() {
            return Err(IndexError::InvalidInput("content is empty".into()));
        }
        let repo = self.repository(&request.repository).await?;
        if !repo.active {
            return Err(IndexError::RepositoryInactive(repo.name));
        }

        let id = document_id(&repo.name, &request.content);
        let policy = match request.boundaries {
            Some(offsets) => ChunkPolicy::Boundaries { offsets },
            None => repo.chunking.clone(),
        };
        // Bad boundaries are rejected before any row is written.
        let chunks = chunk_document(&id, &request.content, &policy)?;
        if chunks.is_empty() {
            return Err(IndexError::InvalidInput("content produced no chunks".into()));
        }

        let _guard = self.locks.acquire(&id).await;

        let existing = with_store_retry(&self.store_retry, "get_document", || {
            self.metadata.get_document(&id)
        })
        .await?;

        if let Some(doc) = &existing {
            if doc.status.is_indexed() {
                debug!(document_id = %id, repository = %repo.name, "already indexed");
                return Ok(IngestOutcome {
                    document_id: id,
                    status: DocumentStatus::Indexed,
                    chunks: chunks.len(),
                    embedded: 0,
                    reused: chunks.len(),
                });
            }
        }

        let timestamp = now();
        let doc = Document {
            id: id.clone(),
            repository: repo.name.clone(),
            content: request.content,
            metadata: request.metadata,
            status: DocumentStatus::Pending,
            chunking: policy,
            created_at: existing.as_ref().map(|d| d.created_at).unwrap_or(timestamp),
            updated_at: timestamp,
        };
        with_store_retry(&self.store_retry, "upsert_document", || {
            self.metadata.upsert_document(&doc)
        })
        .await?;

        if let Some(previous) = &existing {
            if previous.chunking != doc.chunking {
                self.drop_superseded(&repo, previous, &chunks).await?;
            }
        }

        self.set_status(&id, DocumentStatus::Embedding).await?;
        info!(document_id = %id, repository = %repo.name, chunks = chunks.len(), "ingesting");

        self.finish(&repo, &doc, chunks).await
    }

    /// Re-run steps 2–5 for a document left in `embedding` or a recoverable
    /// `failed` state.
    ///
    /// Returns `Ok(None)` when another pipeline owns the id, or when the
    /// document is gone or already indexed.
    pub async fn resume(&self, document_id: &str) -> IndexResult<Option<IngestOutcome>> {
        let Some(guard) = self.locks.try_acquire(document_id) else {
            debug!(document_id, "owned by another pipeline, skipping");
            return Ok(None);
        };
        self.resume_owned(&guard).await
    }

    async fn resume_owned(&self, guard: &DocumentGuard) -> IndexResult<Option<IngestOutcome>> {
        let id = guard.document_id();
        let doc = with_store_retry(&self.store_retry, "get_document", || {
            self.metadata.get_document(id)
        })
        .await?;
        let Some(doc) = doc else {
            return Ok(None);
        };
        if doc.status.is_indexed() {
            return Ok(None);
        }

        let repo = self.repository(&doc.repository).await?;
        let chunks = chunk_document(&doc.id, &doc.content, &doc.chunking)?;
        self.set_status(&doc.id, DocumentStatus::Embedding).await?;
        info!(document_id = %doc.id, repository = %repo.name, previous = %doc.status, "resuming");

        self.finish(&repo, &doc, chunks).await.map(Some)
    }

    /// Steps 3–5, recording `failed(reason)` on error.
    async fn finish(
        &self,
        repo: &Repository,
        doc: &Document,
        chunks: Vec<Chunk>,
    ) -> IndexResult<IngestOutcome> {
        match self.run_pipeline(repo, doc, &chunks).await {
            Ok((embedded, reused)) => {
                info!(
                    document_id = %doc.id,
                    repository = %repo.name,
                    embedded,
                    reused,
                    "indexed"
                );
                Ok(IngestOutcome {
                    document_id: doc.id.clone(),
                    status: DocumentStatus::Indexed,
                    chunks: chunks.len(),
                    embedded,
                    reused,
                })
            }
            Err(failure) => {
                let status = DocumentStatus::Failed(failure.reason);
                warn!(
                    document_id = %doc.id,
                    repository = %repo.name,
                    %status,
                    error = %failure.error,
                    "ingestion failed"
                );
                if let Err(e) = self.set_status(&doc.id, status).await {
                    // The row stays in `embedding`; reconciliation picks it up.
                    warn!(document_id = %doc.id, error = %e, "could not record failure");
                }
                Err(failure.error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        repo: &Repository,
        doc: &Document,
        chunks: &[Chunk],
    ) -> Result<(usize, usize), PipelineFailure> {
        let ids: Vec<String> = chunks.iter().map(|c| c.vector_id.clone()).collect();
        let existing: HashMap<String, IndexEntry> =
            with_store_retry(&self.store_retry, "vector_get", || {
                self.vectors.get(&repo.index, &ids)
            })
            .await
            .map_err(store_failure)?
            .into_iter()
            .map(|e| (e.vector_id.clone(), e))
            .collect();

        let mut vectors: Vec<Option<Vec<f32>>> = chunks
            .iter()
            .map(|chunk| {
                existing
                    .get(&chunk.vector_id)
                    .filter(|e| {
                        e.payload.chunk_hash == chunk.hash
                            && e.payload.model == repo.model
                            && e.payload.document_id == doc.id
                    })
                    .map(|e| e.vector.clone())
            })
            .collect();

        let pending: Vec<usize> = (0..chunks.len()).filter(|&i| vectors[i].is_none()).collect();
        let reused = chunks.len() - pending.len();

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|&i| chunks[i].text.clone()).collect();
            let embedded = self
                .router
                .submit(&repo.model, &texts)
                .await
                .map_err(embed_failure)?;
            for (&i, vector) in pending.iter().zip(embedded) {
                vectors[i] = Some(vector);
            }
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .filter_map(|(chunk, vector)| {
                vector.map(|vector| IndexEntry {
                    vector_id: chunk.vector_id.clone(),
                    vector,
                    payload: EntryPayload {
                        repository: repo.name.clone(),
                        document_id: doc.id.clone(),
                        sequence: chunk.sequence,
                        chunk_hash: chunk.hash.clone(),
                        model: repo.model.clone(),
                        attributes: doc.metadata.clone(),
                    },
                })
            })
            .collect();
        if entries.len() != chunks.len() {
            return Err(PipelineFailure {
                reason: FailureReason::EmbeddingPermanent,
                error: IndexError::Permanent("embedding returned too few vectors".into()),
            });
        }

        with_store_retry(&self.store_retry, "vector_upsert", || {
            self.vectors.upsert(&repo.index, &entries)
        })
        .await
        .map_err(store_failure)?;

        self.set_status(&doc.id, DocumentStatus::Indexed)
            .await
            .map_err(store_failure)?;

        Ok((pending.len(), reused))
    }

    /// Remove vectors left over from a previous chunking of the same row.
    async fn drop_superseded(
        &self,
        repo: &Repository,
        previous: &Document,
        chunks: &[Chunk],
    ) -> IndexResult<()> {
        let current: HashSet<&str> = chunks.iter().map(|c| c.vector_id.as_str()).collect();
        let stale: Vec<String> = vector_ids(&previous.id, &previous.content, &previous.chunking)?
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        debug!(document_id = %previous.id, count = stale.len(), "dropping superseded vectors");
        with_store_retry(&self.store_retry, "vector_delete", || {
            self.vectors.delete(&repo.index, &stale)
        })
        .await?;
        Ok(())
    }

    /// Delete a document: vector entries first, then the metadata row.
    ///
    /// If the vector delete fails the row is kept, so the document is never
    /// reported as present while its vectors are gone.
    pub async fn delete(&self, repository: &str, document_id: &str) -> IndexResult<DeleteOutcome> {
        let repo = self.repository(repository).await?;
        let _guard = self.locks.acquire(document_id).await;

        let doc = with_store_retry(&self.store_retry, "get_document", || {
            self.metadata.get_document(document_id)
        })
        .await?
        .filter(|d| d.repository == repo.name)
        .ok_or_else(|| IndexError::NotFound(format!("document {}", document_id)))?;

        let ids = vector_ids(&doc.id, &doc.content, &doc.chunking)?;
        let removed = with_store_retry(&self.store_retry, "vector_delete", || {
            self.vectors.delete(&repo.index, &ids)
        })
        .await?;

        with_store_retry(&self.store_retry, "delete_document", || {
            self.metadata.delete_document(&doc.id)
        })
        .await?;

        info!(document_id = %doc.id, repository = %repo.name, vectors = removed, "deleted");
        Ok(DeleteOutcome {
            document_id: doc.id,
            vectors_removed: removed,
        })
    }
}
