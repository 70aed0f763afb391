//! Background repair of interrupted pipelines.
//!
//! A crash between the first row write and the status flip leaves a
//! document in `pending` or `embedding`. [`Reconciler::reconcile_once`]
//! finds such documents (and, if enabled, documents that failed for a
//! recoverable reason) and re-runs the pipeline through
//! [`IngestionCoordinator::resume`]. Vector ids are
//! stable, so a pass may safely run more than once over the same document.
//!
//! Documents whose ownership token is held by a live pipeline are skipped
//! and picked up on a later pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use docindex_core::error::IndexResult;
use docindex_core::models::{DocumentStatus, FailureReason};
use docindex_core::store::MetadataStore;

use crate::config::ReconcileConfig;
use crate::ingest::IngestionCoordinator;

#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub interval: Duration,
    /// Only documents untouched for this long are considered stuck.
    pub stale_after: Duration,
    pub retry_failed: bool,
    pub batch_limit: usize,
}

impl ReconcilePolicy {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            retry_failed: config.retry_failed_transient,
            batch_limit: config.batch_limit,
        }
    }

    fn statuses(&self) -> Vec<DocumentStatus> {
        // A crash right after the first row write leaves `pending`.
        let mut statuses = vec![DocumentStatus::Pending, DocumentStatus::Embedding];
        if self.retry_failed {
            statuses.extend(
                [
                    FailureReason::EmbeddingTransient,
                    FailureReason::Backpressure,
                    FailureReason::StoreUnavailable,
                ]
                .into_iter()
                .filter(FailureReason::is_recoverable)
                .map(DocumentStatus::Failed),
            );
        }
        statuses
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub repaired: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    ingest: Arc<IngestionCoordinator>,
    policy: ReconcilePolicy,
}

/// Handle to a running sweep loop.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}

impl Reconciler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        ingest: Arc<IngestionCoordinator>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            metadata,
            ingest,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// One sweep over stuck documents.
    pub async fn reconcile_once(&self) -> IndexResult<ReconcileReport> {
        let cutoff = chrono::Utc::now().timestamp() - self.policy.stale_after.as_secs() as i64;
        let candidates = self
            .metadata
            .list_by_status(&self.policy.statuses(), cutoff, self.policy.batch_limit)
            .await?;

        let mut report = ReconcileReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for doc in candidates {
            match self.ingest.resume(&doc.id).await {
                Ok(Some(_)) => report.repaired += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(document_id = %doc.id, error = %e, "reconcile failed");
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                repaired = report.repaired,
                skipped = report.skipped,
                failed = report.failed,
                "reconcile pass"
            );
        }
        Ok(report)
    }

    /// Run [`reconcile_once`](Self::reconcile_once) every `interval` until
    /// the returned handle is shut down. The first pass runs immediately.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = self.policy.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile_once().await {
                            warn!(error = %e, "reconcile pass aborted");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("reconciler stopped");
        });

        ReconcilerHandle { shutdown, task }
    }
}
