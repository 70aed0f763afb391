//! Per-document ownership tokens.
//!
//! At most one pipeline (ingest, delete, or reconcile) runs for a given
//! document id at a time. Other callers either wait ([`DocumentLocks::acquire`])
//! or skip ([`DocumentLocks::try_acquire`]). Distinct ids never contend.
//!
//! The registry only holds weak references, so an id's entry disappears once
//! its last guard or waiter is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 256;

#[derive(Default)]
pub struct DocumentLocks {
    tokens: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Ownership of one document id. Released on drop.
pub struct DocumentGuard {
    id: String,
    _token: OwnedMutexGuard<()>,
}

impl DocumentGuard {
    pub fn document_id(&self) -> &str {
        &self.id
    }
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = tokens.get(id).and_then(Weak::upgrade) {
            return token;
        }
        if tokens.len() >= PRUNE_THRESHOLD {
            tokens.retain(|_, weak| weak.strong_count() > 0);
        }
        let token = Arc::new(AsyncMutex::new(()));
        tokens.insert(id.to_string(), Arc::downgrade(&token));
        token
    }

    /// Wait until `id` is free, then own it.
    pub async fn acquire(&self, id: &str) -> DocumentGuard {
        let token = self.token(id);
        DocumentGuard {
            id: id.to_string(),
            _token: token.lock_owned().await,
        }
    }

    /// Own `id` if nobody else does.
    pub fn try_acquire(&self, id: &str) -> Option<DocumentGuard> {
        let token = self.token(id);
        token.try_lock_owned().ok().map(|guard| DocumentGuard {
            id: id.to_string(),
            _token: guard,
        })
    }

    /// Number of ids with a live owner or waiter.
    pub fn active(&self) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.values().filter(|w| w.strong_count() > 0).count()
    }
}
