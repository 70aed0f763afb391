//! Similarity search over a repository.
//!
//! The query text is embedded with the repository's model (a single-item
//! batch through the shared router), the vector index returns
//! `top_k × candidate_multiplier` raw hits, and those are folded into
//! one hit per document (MAX aggregation: the best chunk wins).
//!
//! Inactive repositories are still searchable; only ingestion is refused.
//!
//! Every surviving document is resolved through the metadata store. Hits
//! whose document is gone, or is no longer `indexed`, are dropped instead of
//! raising an error: a concurrent delete removes vectors before the row, and
//! a re-ingest may leave vectors of an unfinished pipeline behind.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use docindex_core::error::{IndexError, IndexResult};
use docindex_core::models::{Filter, Metadata};
use docindex_core::store::{MetadataStore, VectorIndex};

use crate::ingest::with_store_retry;
use crate::router::{ModelRouter, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub score: f32,
    pub metadata: Metadata,
    /// Sequence of the best-matching chunk.
    pub sequence: u32,
    pub vector_id: String,
}

pub struct QueryCoordinator {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    router: Arc<ModelRouter>,
    store_retry: RetryPolicy,
    candidate_multiplier: usize,
}

impl QueryCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorIndex>,
        router: Arc<ModelRouter>,
        store_retry: RetryPolicy,
        candidate_multiplier: usize,
    ) -> Self {
        Self {
            metadata,
            vectors,
            router,
            store_retry,
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    pub async fn search(
        &self,
        repository: &str,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> IndexResult<Vec<SearchHit>> {
        let repo = with_store_retry(&self.store_retry, "get_repository", || {
            self.metadata.get_repository(repository)
        })
        .await?
        .ok_or_else(|| IndexError::NotFound(format!("repository {}", repository)))?;

        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self
            .router
            .submit(&repo.model, &[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Permanent("model returned no query vector".into()))?;

        let filter = filter.filter(|f| !f.is_empty());
        let candidates = top_k.saturating_mul(self.candidate_multiplier);
        let raw = with_store_retry(&self.store_retry, "vector_query", || {
            self.vectors.query(&repo.index, &query_vec, candidates, filter)
        })
        .await?;

        // Raw hits arrive ranked, so the first hit per document is its best.
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for hit in raw {
            if !seen.insert(hit.payload.document_id.clone()) {
                continue;
            }

            let doc_id = hit.payload.document_id.as_str();
            let doc = with_store_retry(&self.store_retry, "get_document", || {
                self.metadata.get_document(doc_id)
            })
            .await?;

            match doc {
                Some(doc) if doc.status.is_indexed() && doc.repository == repo.name => {
                    hits.push(SearchHit {
                        document_id: doc.id,
                        score: hit.score,
                        metadata: doc.metadata,
                        sequence: hit.payload.sequence,
                        vector_id: hit.vector_id,
                    });
                    if hits.len() == top_k {
                        break;
                    }
                }
                _ => {
                    debug!(document_id = doc_id, repository = %repo.name, "dropping stale hit");
                }
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.vector_id.cmp(&b.vector_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::router::AdmissionLimits;
    use docindex_core::models::{
        ChunkPolicy, Document, DocumentStatus, EntryPayload, IndexEntry, Repository,
    };
    use docindex_core::store::memory::{InMemoryMetadataStore, InMemoryVectorIndex};

    fn entry(vector_id: &str, document_id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            vector_id: vector_id.into(),
            vector,
            payload: EntryPayload {
                repository: "docs".into(),
                document_id: document_id.into(),
                sequence: 0,
                chunk_hash: "h".into(),
                model: "mini".into(),
                attributes: Metadata::new(),
            },
        }
    }

    fn doc(id: &str, status: DocumentStatus) -> Document {
        Document {
            id: id.into(),
            repository: "docs".into(),
            content: id.into(),
            metadata: Metadata::new(),
            status,
            chunking: ChunkPolicy::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    async fn setup() -> (QueryCoordinator, Arc<InMemoryMetadataStore>, Arc<InMemoryVectorIndex>) {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let mut router = ModelRouter::new(RetryPolicy::default());
        router
            .bind(Arc::new(LocalBackend::hashing("mini", 4)), AdmissionLimits::local())
            .unwrap();
        metadata
            .upsert_repository(&Repository::new("docs", "mini"))
            .await
            .unwrap();
        let q = QueryCoordinator::new(
            metadata.clone(),
            vectors.clone(),
            Arc::new(router),
            RetryPolicy::default(),
            4,
        );
        (q, metadata, vectors)
    }

    #[tokio::test]
    async fn test_stale_and_unfinished_hits_dropped() {
        let (q, metadata, vectors) = setup().await;
        let query_vec = crate::backend::local::hash_embed("anything", 4);

        metadata
            .upsert_document(&doc("live", DocumentStatus::Indexed))
            .await
            .unwrap();
        metadata
            .upsert_document(&doc("midway", DocumentStatus::Embedding))
            .await
            .unwrap();
        vectors
            .upsert(
                "docs",
                &[
                    entry("v1", "live", query_vec.clone()),
                    entry("v2", "midway", query_vec.clone()),
                    entry("v3", "deleted", query_vec.clone()),
                ],
            )
            .await
            .unwrap();

        let hits = q.search("docs", "anything", 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["live"]);
    }

    #[tokio::test]
    async fn test_groups_by_document() {
        let (q, metadata, vectors) = setup().await;
        let query_vec = crate::backend::local::hash_embed("anything", 4);
        metadata
            .upsert_document(&doc("d", DocumentStatus::Indexed))
            .await
            .unwrap();
        vectors
            .upsert(
                "docs",
                &[
                    entry("a", "d", query_vec.clone()),
                    entry("b", "d", query_vec.clone()),
                ],
            )
            .await
            .unwrap();
        let hits = q.search("docs", "anything", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_id, "a");
    }

    #[tokio::test]
    async fn test_blank_query_and_zero_top_k() {
        let (q, _, _) = setup().await;
        assert!(q.search("docs", "   ", 5, None).await.unwrap().is_empty());
        assert!(q.search("docs", "fox", 0, None).await.unwrap().is_empty());
        assert!(matches!(
            q.search("nope", "fox", 5, None).await,
            Err(IndexError::NotFound(_))
        ));
    }
}
