//! Model routing with per-backend admission control.
//!
//! The [`ModelRouter`] owns every bound [`ModelBackend`] and is shared by the
//! ingestion and query coordinators. For each backend it keeps an
//! admission budget:
//!
//! - at most `max_in_flight` concurrent `embed` calls (semaphore),
//! - at most `max_queued` callers waiting for a slot; one more is rejected
//!   with `EmbedError::Backpressure` immediately,
//! - an optional `requests_per_second` quota (`governor`).
//!
//! Budget bookkeeping happens under a short-lived mutex. The embedding call
//! itself runs with only a semaphore permit held.
//!
//! Retryable failures (`Transient`, `Timeout`) are retried with exponential
//! backoff. The permit is released between attempts.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use docindex_core::backend::{BackendKind, ModelBackend};
use docindex_core::error::{EmbedError, EmbedResult};

use crate::backend::build_backend;
use crate::config::{Config, ModelConfig, PipelineConfig};

const DEFAULT_REMOTE_IN_FLIGHT: usize = 4;
const DEFAULT_REMOTE_QUEUED: usize = 64;

/// Concurrency and rate limits for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_in_flight: usize,
    /// `None` means callers may wait without bound.
    pub max_queued: Option<usize>,
    pub requests_per_second: Option<NonZeroU32>,
}

impl AdmissionLimits {
    /// Local inference: one call per core, unbounded queue, no rate limit.
    pub fn local() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_in_flight: cores,
            max_queued: None,
            requests_per_second: None,
        }
    }

    pub fn remote() -> Self {
        Self {
            max_in_flight: DEFAULT_REMOTE_IN_FLIGHT,
            max_queued: Some(DEFAULT_REMOTE_QUEUED),
            requests_per_second: None,
        }
    }

    pub fn from_config(config: &ModelConfig, kind: BackendKind) -> Self {
        let base = match kind {
            BackendKind::Local => Self::local(),
            BackendKind::Remote => Self::remote(),
        };
        Self {
            max_in_flight: config.max_in_flight.unwrap_or(base.max_in_flight).max(1),
            max_queued: config.max_queued.or(base.max_queued),
            requests_per_second: config
                .requests_per_second
                .and_then(NonZeroU32::new)
                .or(base.requests_per_second),
        }
    }
}

/// Snapshot of one backend's budget usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    pub in_flight: usize,
    pub queued: usize,
}

struct Admission {
    limits: AdmissionLimits,
    slots: Arc<Semaphore>,
    queued: Mutex<usize>,
    limiter: Option<DefaultDirectRateLimiter>,
}

/// Held for the duration of one `embed` call.
struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

/// Decrements the queue counter when a waiter leaves, including on
/// cancellation.
struct QueueSlot<'a> {
    queued: &'a Mutex<usize>,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut n) = self.queued.lock() {
            *n = n.saturating_sub(1);
        }
    }
}

impl Admission {
    fn new(limits: AdmissionLimits) -> Self {
        let limiter = limits
            .requests_per_second
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            slots: Arc::new(Semaphore::new(limits.max_in_flight)),
            queued: Mutex::new(0),
            limiter,
            limits,
        }
    }

    async fn acquire(&self, model_id: &str) -> EmbedResult<AdmissionPermit> {
        let slot = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let _waiting = self.enqueue(model_id)?;
                Arc::clone(&self.slots)
                    .acquire_owned()
                    .await
                    .map_err(|_| EmbedError::Transient(format!("{}: admission closed", model_id)))?
            }
        };

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        Ok(AdmissionPermit { _slot: slot })
    }

    fn enqueue(&self, model_id: &str) -> EmbedResult<QueueSlot<'_>> {
        let mut queued = self
            .queued
            .lock()
            .map_err(|_| EmbedError::Transient(format!("{}: admission state poisoned", model_id)))?;
        if let Some(max) = self.limits.max_queued {
            if *queued >= max {
                return Err(EmbedError::Backpressure {
                    model: model_id.to_string(),
                });
            }
        }
        *queued += 1;
        Ok(QueueSlot {
            queued: &self.queued,
        })
    }

    fn stats(&self) -> AdmissionStats {
        let queued = self.queued.lock().map(|n| *n).unwrap_or(0);
        AdmissionStats {
            in_flight: self.limits.max_in_flight - self.slots.available_permits(),
            queued,
        }
    }
}

/// Exponential backoff schedule shared by embedding and store retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Budget for a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self {
            max_retries: pipeline.max_retries,
            initial_backoff: Duration::from_millis(pipeline.initial_backoff_ms),
            max_backoff: Duration::from_millis(pipeline.max_backoff_ms),
            attempt_timeout: pipeline.embed_timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based): initial, 2×, 4×, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

struct Route {
    backend: Arc<dyn ModelBackend>,
    admission: Admission,
}

/// Maps model ids to backends and enforces their admission budgets.
pub struct ModelRouter {
    routes: HashMap<String, Route>,
    retry: RetryPolicy,
}

impl ModelRouter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            routes: HashMap::new(),
            retry,
        }
    }

    /// Bind every `[[models]]` entry. Fails on the first backend that
    /// cannot be bound.
    pub fn from_config(config: &Config) -> EmbedResult<Self> {
        let mut router = Self::new(RetryPolicy::from_config(&config.pipeline));
        for model in &config.models {
            let backend = build_backend(model, config.pipeline.embed_timeout())?;
            let limits = AdmissionLimits::from_config(model, backend.kind());
            router.bind(backend, limits)?;
        }
        Ok(router)
    }

    pub fn bind(&mut self, backend: Arc<dyn ModelBackend>, limits: AdmissionLimits) -> EmbedResult<()> {
        let id = backend.model_id().to_string();
        if self.routes.contains_key(&id) {
            return Err(EmbedError::Configuration(format!(
                "model '{}' is already bound",
                id
            )));
        }
        debug!(model = %id, kind = ?backend.kind(), ?limits, "bound model backend");
        self.routes.insert(
            id,
            Route {
                backend,
                admission: Admission::new(limits),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, model_id: &str) -> EmbedResult<Arc<dyn ModelBackend>> {
        self.route(model_id).map(|r| Arc::clone(&r.backend))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn stats(&self, model_id: &str) -> Option<AdmissionStats> {
        self.routes.get(model_id).map(|r| r.admission.stats())
    }

    /// Embed `texts` with `model_id`, in order, one vector per text.
    pub async fn submit(&self, model_id: &str, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedError::Permanent("blank text in embedding batch".into()));
        }

        let route = self.route(model_id)?;
        let max_batch = route.backend.max_batch().max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(max_batch) {
            vectors.extend(self.embed_with_retry(model_id, route, batch).await?);
        }
        Ok(vectors)
    }

    fn route(&self, model_id: &str) -> EmbedResult<&Route> {
        self.routes
            .get(model_id)
            .ok_or_else(|| EmbedError::Configuration(format!("unknown model '{}'", model_id)))
    }

    async fn embed_with_retry(
        &self,
        model_id: &str,
        route: &Route,
        batch: &[String],
    ) -> EmbedResult<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.attempt(model_id, route, batch).await {
                Ok(vectors) => return check_output(route.backend.as_ref(), batch.len(), vectors),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    warn!(model = %model_id, attempt, ?delay, error = %e, "embedding failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        model_id: &str,
        route: &Route,
        batch: &[String],
    ) -> EmbedResult<Vec<Vec<f32>>> {
        let _permit = route.admission.acquire(model_id).await?;
        match tokio::time::timeout(self.retry.attempt_timeout, route.backend.embed(batch)).await {
            Ok(result) => result,
            Err(_) => Err(EmbedError::Timeout(self.retry.attempt_timeout)),
        }
    }
}

fn check_output(
    backend: &dyn ModelBackend,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> EmbedResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(EmbedError::Permanent(format!(
            "{} returned {} vectors for {} inputs",
            backend.model_id(),
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != backend.dims()) {
        return Err(EmbedError::Permanent(format!(
            "{} returned a {}-dim vector, expected {}",
            backend.model_id(),
            bad.len(),
            backend.dims()
        )));
    }
    Ok(vectors)
}
