//! Integration tests for the ingestion, query, and reconciliation pipeline.
//!
//! These drive [`IndexService`] through in-memory stores with test-double
//! model backends, so every property is checked without network or disk.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docindex::backend::LocalBackend;
use docindex::config::{PipelineConfig, ReconcileConfig, RetrievalConfig};
use docindex::{AdmissionLimits, IndexService, IngestRequest, ModelRouter, RetryPolicy, ServiceParts};
use docindex_core::backend::{BackendKind, ModelBackend};
use docindex_core::chunk::{document_id, vector_id};
use docindex_core::error::{EmbedError, EmbedResult, IndexError, StoreError, StoreResult};
use docindex_core::models::{
    ChunkPolicy, Document, DocumentStatus, FailureReason, Filter, Metadata, Page, Repository,
};
use docindex_core::store::memory::{InMemoryMetadataStore, InMemoryVectorIndex};
use docindex_core::store::{MetadataStore, VectorIndex};

// ─── Test backends ──────────────────────────────────────────────────

/// Hashing backend that counts calls and embedded items.
struct CountingBackend {
    inner: LocalBackend,
    calls: AtomicUsize,
    items: AtomicUsize,
    failing: AtomicBool,
}

impl CountingBackend {
    fn new(model: &str, dims: usize) -> Self {
        Self {
            inner: LocalBackend::hashing(model, dims),
            calls: AtomicUsize::new(0),
            items: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn items(&self) -> usize {
        self.items.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for CountingBackend {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    fn max_batch(&self) -> usize {
        self.inner.max_batch()
    }
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbedError::Transient("503 service unavailable".into()));
        }
        self.items.fetch_add(batch.len(), Ordering::SeqCst);
        self.inner.embed(batch).await
    }
}

/// Returns the same unit vector for every input, so every hit ties.
struct ConstantBackend;

#[async_trait]
impl ModelBackend for ConstantBackend {
    fn model_id(&self) -> &str {
        "flat"
    }
    fn dims(&self) -> usize {
        3
    }
    fn max_batch(&self) -> usize {
        16
    }
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        Ok(batch.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Remote-kind backend that blocks every call until released.
struct GatedBackend {
    gate: tokio::sync::Semaphore,
}

#[async_trait]
impl ModelBackend for GatedBackend {
    fn model_id(&self) -> &str {
        "gated"
    }
    fn dims(&self) -> usize {
        2
    }
    fn max_batch(&self) -> usize {
        8
    }
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }
    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EmbedError::Transient("gate closed".into()))?;
        permit.forget();
        Ok(batch.iter().map(|_| vec![0.0, 1.0]).collect())
    }
}

// ─── Crashing metadata store ────────────────────────────────────────

/// Delegates to an in-memory store; when armed, every `set_status` fails as
/// if the process died right after the vector upsert.
struct CrashingMetadata {
    inner: InMemoryMetadataStore,
    crash_on_status: AtomicBool,
}

#[async_trait]
impl MetadataStore for CrashingMetadata {
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()> {
        self.inner.upsert_document(doc).await
    }
    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        self.inner.get_document(id).await
    }
    async fn set_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        if status == DocumentStatus::Embedding || !self.crash_on_status.load(Ordering::SeqCst) {
            return self.inner.set_status(id, status).await;
        }
        Err(StoreError::Rejected("simulated crash".into()))
    }
    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete_document(id).await
    }
    async fn list_by_repository(&self, repository: &str, page: Page) -> StoreResult<Vec<Document>> {
        self.inner.list_by_repository(repository, page).await
    }
    async fn list_by_status(
        &self,
        statuses: &[DocumentStatus],
        updated_before: i64,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        self.inner
            .list_by_status(statuses, updated_before, limit)
            .await
    }
    async fn count_by_repository(&self, repository: &str) -> StoreResult<usize> {
        self.inner.count_by_repository(repository).await
    }
    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<()> {
        self.inner.upsert_repository(repo).await
    }
    async fn get_repository(&self, name: &str) -> StoreResult<Option<Repository>> {
        self.inner.get_repository(name).await
    }
    async fn list_repositories(&self) -> StoreResult<Vec<Repository>> {
        self.inner.list_repositories().await
    }
    async fn set_repository_active(&self, name: &str, active: bool) -> StoreResult<()> {
        self.inner.set_repository_active(name, active).await
    }
}

// ─── Harness ────────────────────────────────────────────────────────

fn fast_pipeline() -> PipelineConfig {
    PipelineConfig {
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        embed_timeout_secs: 5,
        store_timeout_secs: 5,
    }
}

fn eager_reconcile() -> ReconcileConfig {
    ReconcileConfig {
        stale_after_secs: 0,
        retry_failed_transient: true,
        ..Default::default()
    }
}

struct Harness {
    service: IndexService,
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<InMemoryVectorIndex>,
}

async fn harness_with(
    metadata: Arc<dyn MetadataStore>,
    backend: Arc<dyn ModelBackend>,
    limits: AdmissionLimits,
) -> Harness {
    let vectors = Arc::new(InMemoryVectorIndex::new());
    let mut router = ModelRouter::new(RetryPolicy::from_config(&fast_pipeline()));
    let model = backend.model_id().to_string();
    router.bind(backend, limits).unwrap();

    let service = IndexService::from_parts(ServiceParts {
        metadata: metadata.clone(),
        vectors: vectors.clone(),
        router,
        pipeline: fast_pipeline(),
        retrieval: RetrievalConfig::default(),
        reconcile: eager_reconcile(),
    });
    service
        .register_repository(Repository::new("docs", model))
        .await
        .unwrap();

    Harness {
        service,
        metadata,
        vectors,
    }
}

async fn harness(backend: Arc<dyn ModelBackend>) -> Harness {
    harness_with(
        Arc::new(InMemoryMetadataStore::new()),
        backend,
        AdmissionLimits::local(),
    )
    .await
}

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
}

// ─── Scenario ───────────────────────────────────────────────────────

#[tokio::test]
async fn quick_brown_fox_is_indexed_and_found() {
    let backend = Arc::new(CountingBackend::new("mini", 384));
    let h = harness(backend.clone()).await;

    let outcome = h
        .service
        .ingest(IngestRequest::new("docs", "the quick brown fox"))
        .await
        .unwrap();
    h.service
        .ingest(IngestRequest::new("docs", "quarterly revenue report for the board"))
        .await
        .unwrap();

    assert_eq!(outcome.status, DocumentStatus::Indexed);
    assert_eq!(outcome.chunks, 1);
    assert_eq!(outcome.document_id, document_id("docs", "the quick brown fox"));

    let doc = h.service.get_document(&outcome.document_id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);

    let entries = h
        .vectors
        .get(
            "docs",
            &[docindex_core::chunk::vector_id(&outcome.document_id, 0)],
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].vector.len(), 384);

    let hits = h
        .service
        .search("docs", "quick fox", Some(1), None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, outcome.document_id);
    assert!(hits[0].score > 0.0);
}

// ─── Idempotent ingestion ───────────────────────────────────────────

#[tokio::test]
async fn reingesting_identical_content_is_a_no_op() {
    let backend = Arc::new(CountingBackend::new("mini", 64));
    let h = harness(backend.clone()).await;
    let content = "First paragraph about storage.\n\nSecond paragraph about queues.";

    let first = h
        .service
        .ingest(IngestRequest::new("docs", content))
        .await
        .unwrap();
    let calls_after_first = backend.calls();
    let vectors_after_first = h.vectors.count("docs").await.unwrap();

    // Trailing whitespace and CRLF normalise to the same id.
    let second = h
        .service
        .ingest(IngestRequest::new(
            "docs",
            "First paragraph about storage.  \r\n\r\nSecond paragraph about queues.\n",
        ))
        .await
        .unwrap();

    assert_eq!(first.document_id, second.document_id);
    assert_eq!(second.status, DocumentStatus::Indexed);
    assert_eq!(second.embedded, 0);
    assert_eq!(backend.calls(), calls_after_first);
    assert_eq!(h.metadata.count_by_repository("docs").await.unwrap(), 1);
    assert_eq!(h.vectors.count("docs").await.unwrap(), vectors_after_first);
}

#[tokio::test]
async fn concurrent_same_content_commits_once() {
    let backend = Arc::new(CountingBackend::new("mini", 32));
    let h = Arc::new(harness(backend.clone()).await);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.service
                .ingest(IngestRequest::new("docs", "one document, many submitters"))
                .await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, DocumentStatus::Indexed);
    }

    assert_eq!(backend.items(), 1);
    assert_eq!(h.metadata.count_by_repository("docs").await.unwrap(), 1);
    assert_eq!(h.vectors.count("docs").await.unwrap(), 1);
}

// ─── Consistency ordering ───────────────────────────────────────────

#[tokio::test]
async fn crash_before_status_flip_resumes_without_reembedding() {
    let backend = Arc::new(CountingBackend::new("mini", 64));
    let metadata = Arc::new(CrashingMetadata {
        inner: InMemoryMetadataStore::new(),
        crash_on_status: AtomicBool::new(true),
    });
    let h = harness_with(metadata.clone(), backend.clone(), AdmissionLimits::local()).await;
    let content = "alpha section.\n\nbeta section.\n\ngamma section.";
    let request = IngestRequest::new("docs", content).with_boundaries(vec![14, 30]);

    let err = h.service.ingest(request.clone()).await.unwrap_err();
    assert!(matches!(err, IndexError::Permanent(_)));

    let id = document_id("docs", content);
    let doc = h.service.get_document(&id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Embedding);
    assert_eq!(h.vectors.count("docs").await.unwrap(), 3);
    assert_eq!(backend.items(), 3);

    // The process "restarts": writes work again.
    metadata.crash_on_status.store(false, Ordering::SeqCst);
    let calls_before = backend.calls();
    let outcome = h.service.ingest(request).await.unwrap();

    assert_eq!(outcome.status, DocumentStatus::Indexed);
    assert_eq!(outcome.embedded, 0);
    assert_eq!(outcome.reused, 3);
    assert_eq!(backend.calls(), calls_before);
    assert_eq!(h.vectors.count("docs").await.unwrap(), 3);
}

#[tokio::test]
async fn reconciler_completes_rows_left_pending() {
    let backend = Arc::new(CountingBackend::new("mini", 32));
    let h = harness(backend.clone()).await;

    // Only the first row write landed before the process died.
    let content = "written but never started";
    let id = document_id("docs", content);
    h.metadata
        .upsert_document(&Document {
            id: id.clone(),
            repository: "docs".into(),
            content: content.into(),
            metadata: Metadata::new(),
            status: DocumentStatus::Pending,
            chunking: ChunkPolicy::default(),
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();

    let report = h.service.reconciler().reconcile_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired, 1);

    let doc = h.service.get_document(&id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(h.vectors.count("docs").await.unwrap(), 1);
    assert_eq!(backend.items(), 1);
}

#[tokio::test]
async fn reconciler_completes_stuck_documents() {
    let backend = Arc::new(CountingBackend::new("mini", 64));
    let metadata = Arc::new(CrashingMetadata {
        inner: InMemoryMetadataStore::new(),
        crash_on_status: AtomicBool::new(true),
    });
    let h = harness_with(metadata.clone(), backend.clone(), AdmissionLimits::local()).await;

    let _ = h
        .service
        .ingest(IngestRequest::new("docs", "left mid-pipeline"))
        .await;
    metadata.crash_on_status.store(false, Ordering::SeqCst);
    let id = document_id("docs", "left mid-pipeline");
    let items_before = backend.items();

    let report = h.service.reconciler().reconcile_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.repaired, 1);

    let doc = h.service.get_document(&id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(backend.items(), items_before);

    // Nothing left to do on a second pass.
    let report = h.service.reconciler().reconcile_once().await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn transient_embedding_failure_is_recorded_and_recoverable() {
    let backend = Arc::new(CountingBackend::new("mini", 16));
    let h = harness(backend.clone()).await;
    backend.failing.store(true, Ordering::SeqCst);

    let err = h
        .service
        .ingest(IngestRequest::new("docs", "flaky upstream"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Transient(_)));
    // One attempt plus two retries.
    assert_eq!(backend.calls(), 3);

    let id = document_id("docs", "flaky upstream");
    let doc = h.service.get_document(&id).await.unwrap();
    assert_eq!(
        doc.status,
        DocumentStatus::Failed(FailureReason::EmbeddingTransient)
    );
    assert_eq!(h.vectors.count("docs").await.unwrap(), 0);

    backend.failing.store(false, Ordering::SeqCst);
    assert!(h
        .service
        .search("docs", "flaky upstream", Some(5), None)
        .await
        .unwrap()
        .is_empty());

    let report = h.service.reconciler().reconcile_once().await.unwrap();
    assert_eq!(report.repaired, 1);
    let doc = h.service.get_document(&id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);
}

#[tokio::test]
async fn reconciler_loop_runs_and_shuts_down() {
    let backend = Arc::new(CountingBackend::new("mini", 16));
    let h = harness(backend.clone()).await;
    backend.failing.store(true, Ordering::SeqCst);
    let _ = h
        .service
        .ingest(IngestRequest::new("docs", "eventually indexed"))
        .await;
    backend.failing.store(false, Ordering::SeqCst);

    // The first tick fires immediately.
    let handle = h.service.reconciler().spawn();
    let id = document_id("docs", "eventually indexed");
    let mut indexed = false;
    for _ in 0..100 {
        if h.service.get_document(&id).await.unwrap().status.is_indexed() {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .unwrap();
    assert!(indexed);
}

// ─── Query determinism ──────────────────────────────────────────────

#[tokio::test]
async fn tied_scores_order_by_vector_id() {
    let h = harness(Arc::new(ConstantBackend)).await;
    for i in 0..6 {
        h.service
            .ingest(IngestRequest::new("docs", format!("document number {i}")))
            .await
            .unwrap();
    }

    let first = h
        .service
        .search("docs", "anything", Some(4), None)
        .await
        .unwrap();
    assert_eq!(first.len(), 4);
    for _ in 0..5 {
        let again = h
            .service
            .search("docs", "anything", Some(4), None)
            .await
            .unwrap();
        assert_eq!(again, first);
    }

    let ids: Vec<&str> = first.iter().map(|hit| hit.vector_id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn metadata_filter_restricts_results() {
    let h = harness(Arc::new(CountingBackend::new("mini", 64))).await;
    h.service
        .ingest(IngestRequest::new("docs", "deploy guide").with_metadata(meta(&[("lang", "en")])))
        .await
        .unwrap();
    let de = h
        .service
        .ingest(
            IngestRequest::new("docs", "deploy anleitung").with_metadata(meta(&[("lang", "de")])),
        )
        .await
        .unwrap();

    let filter = Filter::new().with("lang", "de");
    let hits = h
        .service
        .search("docs", "deploy", Some(10), Some(&filter))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, de.document_id);
    assert_eq!(hits[0].metadata.get("lang").map(String::as_str), Some("de"));
}

// ─── Delete completeness ────────────────────────────────────────────

#[tokio::test]
async fn deleted_documents_disappear() {
    let h = harness(Arc::new(CountingBackend::new("mini", 64))).await;
    let keep = h
        .service
        .ingest(IngestRequest::new("docs", "kubernetes cluster upgrade notes"))
        .await
        .unwrap();
    let gone = h
        .service
        .ingest(IngestRequest::new(
            "docs",
            "kubernetes node maintenance.\n\nDrain the node first.",
        ))
        .await
        .unwrap();

    let outcome = h.service.delete("docs", &gone.document_id).await.unwrap();
    assert_eq!(outcome.vectors_removed, gone.chunks);

    assert!(matches!(
        h.service.get_document(&gone.document_id).await,
        Err(IndexError::NotFound(_))
    ));
    let hits = h
        .service
        .search("docs", "kubernetes node", Some(10), None)
        .await
        .unwrap();
    assert!(hits.iter().all(|hit| hit.document_id != gone.document_id));
    assert!(hits.iter().any(|hit| hit.document_id == keep.document_id));
    assert_eq!(h.vectors.count("docs").await.unwrap(), keep.chunks);

    assert!(matches!(
        h.service.delete("docs", &gone.document_id).await,
        Err(IndexError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_reports_vectors_actually_removed() {
    let h = harness(Arc::new(CountingBackend::new("mini", 64))).await;
    let ingested = h
        .service
        .ingest(
            IngestRequest::new("docs", "First part about disks. Second part about memory.")
                .with_boundaries(vec![24]),
        )
        .await
        .unwrap();
    assert_eq!(ingested.chunks, 2);

    // One entry already went missing out of band.
    let lost = h
        .vectors
        .delete("docs", &[vector_id(&ingested.document_id, 0)])
        .await
        .unwrap();
    assert_eq!(lost, 1);

    let outcome = h.service.delete("docs", &ingested.document_id).await.unwrap();
    assert_eq!(outcome.vectors_removed, 1);
    assert_eq!(h.vectors.count("docs").await.unwrap(), 0);
}

// ─── Backpressure ───────────────────────────────────────────────────

#[tokio::test]
async fn full_queue_returns_backpressure() {
    let backend = Arc::new(GatedBackend {
        gate: tokio::sync::Semaphore::new(0),
    });
    let limits = AdmissionLimits {
        max_in_flight: 1,
        max_queued: Some(1),
        requests_per_second: None,
    };
    let mut router = ModelRouter::new(RetryPolicy::from_config(&fast_pipeline()));
    router.bind(backend.clone(), limits).unwrap();
    let router = Arc::new(router);

    let spawn_call = |text: &str| {
        let router = Arc::clone(&router);
        let texts = vec![text.to_string()];
        tokio::spawn(async move { router.submit("gated", &texts).await })
    };

    let in_flight = spawn_call("first");
    wait_for(|| router.stats("gated").map(|s| s.in_flight) == Some(1)).await;
    let queued = spawn_call("second");
    wait_for(|| router.stats("gated").map(|s| s.queued) == Some(1)).await;

    // Budget exhausted: the third call is rejected, not blocked.
    let rejected = tokio::time::timeout(
        Duration::from_secs(1),
        router.submit("gated", &["third".to_string()]),
    )
    .await
    .expect("overflow must not block");
    assert!(matches!(rejected, Err(EmbedError::Backpressure { .. })));

    // The queued call was not failed; it completes once capacity frees up.
    backend.gate.add_permits(2);
    assert_eq!(in_flight.await.unwrap().unwrap().len(), 1);
    assert_eq!(queued.await.unwrap().unwrap().len(), 1);
    assert_eq!(
        router.stats("gated"),
        Some(docindex::router::AdmissionStats {
            in_flight: 0,
            queued: 0
        })
    );
}

#[tokio::test]
async fn backpressure_marks_document_failed() {
    let backend = Arc::new(GatedBackend {
        gate: tokio::sync::Semaphore::new(0),
    });
    let limits = AdmissionLimits {
        max_in_flight: 1,
        max_queued: Some(0),
        requests_per_second: None,
    };
    let h = Arc::new(
        harness_with(
            Arc::new(InMemoryMetadataStore::new()),
            backend.clone(),
            limits,
        )
        .await,
    );

    let blocker = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            h.service
                .ingest(IngestRequest::new("docs", "holds the only slot"))
                .await
        })
    };
    wait_for(|| h.service.router().stats("gated").map(|s| s.in_flight) == Some(1)).await;

    let err = h
        .service
        .ingest(IngestRequest::new("docs", "arrives too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Backpressure(_)));
    let doc = h
        .service
        .get_document(&document_id("docs", "arrives too late"))
        .await
        .unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed(FailureReason::Backpressure));

    backend.gate.add_permits(1);
    let outcome = blocker.await.unwrap().unwrap();
    assert_eq!(outcome.status, DocumentStatus::Indexed);
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ─── Repository rules ───────────────────────────────────────────────

#[tokio::test]
async fn repository_binding_is_immutable_once_populated() {
    let h = harness(Arc::new(CountingBackend::new("mini", 16))).await;
    let rebound = Repository::new("docs", "mini").with_index("docs-v2");

    // Empty repositories may be rebound.
    let record = h.service.register_repository(rebound.clone()).await.unwrap();
    assert_eq!(record.index, "docs-v2");

    h.service
        .ingest(IngestRequest::new("docs", "pins the binding"))
        .await
        .unwrap();
    let err = h
        .service
        .register_repository(Repository::new("docs", "mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Configuration(_)));

    // Same binding is accepted.
    h.service.register_repository(rebound).await.unwrap();

    let unknown_model = h
        .service
        .register_repository(Repository::new("other", "missing-model"))
        .await
        .unwrap_err();
    assert!(matches!(unknown_model, IndexError::Configuration(_)));
}

#[tokio::test]
async fn deactivated_repository_refuses_ingest_but_stays_searchable() {
    let h = harness(Arc::new(CountingBackend::new("mini", 16))).await;
    let outcome = h
        .service
        .ingest(IngestRequest::new("docs", "kept around"))
        .await
        .unwrap();

    h.service.deactivate_repository("docs").await.unwrap();
    assert!(matches!(
        h.service
            .ingest(IngestRequest::new("docs", "new content"))
            .await,
        Err(IndexError::RepositoryInactive(_))
    ));
    let hits = h
        .service
        .search("docs", "kept", Some(1), None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, outcome.document_id);
    assert!(h.service.get_document(&outcome.document_id).await.is_ok());

    let summaries = h.service.repositories().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].active);
    assert_eq!(summaries[0].documents, 1);

    h.service.activate_repository("docs").await.unwrap();
    assert_eq!(
        h.service
            .search("docs", "kept", Some(1), None)
            .await
            .unwrap()
            .len(),
        1
    );
}
