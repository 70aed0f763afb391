//! In-memory [`VectorIndex`] and [`MetadataStore`] implementations.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over the namespace.
//! Locks are never held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{check_dimensions, rank_hits, MetadataStore, VectorIndex};
use crate::embedding::QueryVector;
use crate::error::{StoreError, StoreResult};
use crate::models::{Document, DocumentStatus, Filter, IndexEntry, Page, Repository, VectorHit};

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
}

/// Namespace → (vector id → entry). `BTreeMap` keeps iteration ordered by id.
type Namespaces = HashMap<String, BTreeMap<String, IndexEntry>>;

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<Namespaces>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> StoreResult<()> {
        let mut namespaces = write(&self.namespaces)?;
        let ns = namespaces.entry(namespace.to_string()).or_default();
        check_dimensions(ns.values().next().map(|e| e.vector.len()), entries)?;
        for entry in entries {
            ns.insert(entry.vector_id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<VectorHit>> {
        let namespaces = read(&self.namespaces)?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        if let Some(first) = ns.values().next() {
            if first.vector.len() != vector.len() {
                return Err(StoreError::Rejected(format!(
                    "query dimension {} does not match namespace dimension {}",
                    vector.len(),
                    first.vector.len()
                )));
            }
        }
        let query = QueryVector::new(vector);
        let mut hits: Vec<VectorHit> = ns
            .values()
            .filter(|e| filter.map(|f| f.matches(&e.payload.attributes)).unwrap_or(true))
            .map(|e| VectorHit {
                vector_id: e.vector_id.clone(),
                score: query.score(&e.vector),
                payload: e.payload.clone(),
            })
            .collect();
        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<Vec<IndexEntry>> {
        let namespaces = read(&self.namespaces)?;
        Ok(namespaces
            .get(namespace)
            .map(|ns| {
                vector_ids
                    .iter()
                    .filter_map(|id| ns.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<usize> {
        let mut namespaces = write(&self.namespaces)?;
        let Some(ns) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(vector_ids.iter().filter(|id| ns.remove(*id).is_some()).count())
    }

    async fn count(&self, namespace: &str) -> StoreResult<usize> {
        let namespaces = read(&self.namespaces)?;
        Ok(namespaces.get(namespace).map(BTreeMap::len).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// In-memory metadata store.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    docs: RwLock<HashMap<String, Document>>,
    repos: RwLock<BTreeMap<String, Repository>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()> {
        let mut docs = write(&self.docs)?;
        let created_at = docs.get(&doc.id).map(|d| d.created_at);
        let mut stored = doc.clone();
        if let Some(created_at) = created_at {
            stored.created_at = created_at;
        }
        docs.insert(doc.id.clone(), stored);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(read(&self.docs)?.get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        let mut docs = write(&self.docs)?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        doc.status = status;
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        Ok(write(&self.docs)?.remove(id).is_some())
    }

    async fn list_by_repository(&self, repository: &str, page: Page) -> StoreResult<Vec<Document>> {
        let docs = read(&self.docs)?;
        let mut matching: Vec<&Document> =
            docs.values().filter(|d| d.repository == repository).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn list_by_status(
        &self,
        statuses: &[DocumentStatus],
        updated_before: i64,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        let docs = read(&self.docs)?;
        let mut matching: Vec<&Document> = docs
            .values()
            .filter(|d| statuses.contains(&d.status) && d.updated_at <= updated_before)
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn count_by_repository(&self, repository: &str) -> StoreResult<usize> {
        Ok(read(&self.docs)?
            .values()
            .filter(|d| d.repository == repository)
            .count())
    }

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<()> {
        write(&self.repos)?.insert(repo.name.clone(), repo.clone());
        Ok(())
    }

    async fn get_repository(&self, name: &str) -> StoreResult<Option<Repository>> {
        Ok(read(&self.repos)?.get(name).cloned())
    }

    async fn list_repositories(&self) -> StoreResult<Vec<Repository>> {
        Ok(read(&self.repos)?.values().cloned().collect())
    }

    async fn set_repository_active(&self, name: &str, active: bool) -> StoreResult<()> {
        let mut repos = write(&self.repos)?;
        let repo = repos
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("repository {name}")))?;
        repo.active = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkPolicy, EntryPayload, Metadata};

    fn entry(id: &str, vector: Vec<f32>, lang: &str) -> IndexEntry {
        let mut attributes = Metadata::new();
        attributes.insert("lang".into(), lang.into());
        IndexEntry {
            vector_id: id.to_string(),
            vector,
            payload: EntryPayload {
                repository: "docs".into(),
                document_id: format!("doc-{id}"),
                sequence: 0,
                chunk_hash: "h".into(),
                model: "m".into(),
                attributes,
            },
        }
    }

    fn document(id: &str, repo: &str, created_at: i64) -> Document {
        Document {
            id: id.to_string(),
            repository: repo.to_string(),
            content: "body".into(),
            metadata: Metadata::new(),
            status: DocumentStatus::Pending,
            chunking: ChunkPolicy::default(),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = InMemoryVectorIndex::new();
        index.upsert("ns", &[entry("a", vec![1.0, 0.0], "en")]).await.unwrap();
        index.upsert("ns", &[entry("a", vec![0.0, 1.0], "en")]).await.unwrap();
        assert_eq!(index.count("ns").await.unwrap(), 1);
        let got = index.get("ns", &["a".to_string()]).await.unwrap();
        assert_eq!(got[0].vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_query_ties_break_by_vector_id() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "ns",
                &[
                    entry("c", vec![1.0, 0.0], "en"),
                    entry("a", vec![1.0, 0.0], "en"),
                    entry("b", vec![0.0, 1.0], "en"),
                ],
            )
            .await
            .unwrap();
        let hits = index.query("ns", &[1.0, 0.0], 3, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.vector_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_query_filter_and_namespace_isolation() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "ns",
                &[entry("a", vec![1.0, 0.0], "en"), entry("b", vec![1.0, 0.1], "de")],
            )
            .await
            .unwrap();
        let filter = Filter::new().with("lang", "de");
        let hits = index.query("ns", &[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_id, "b");
        assert!(index.query("other", &[1.0, 0.0], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::new();
        index.upsert("ns", &[entry("a", vec![1.0, 0.0], "en")]).await.unwrap();
        let err = index
            .upsert("ns", &[entry("b", vec![1.0, 0.0, 0.0], "en")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(index.count("ns").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_ignores_missing() {
        let index = InMemoryVectorIndex::new();
        index.upsert("ns", &[entry("a", vec![1.0], "en")]).await.unwrap();
        let removed = index
            .delete("ns", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.count("ns").await.unwrap(), 0);
        assert_eq!(index.delete("empty", &["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metadata_upsert_keeps_created_at() {
        let store = InMemoryMetadataStore::new();
        store.upsert_document(&document("d1", "docs", 10)).await.unwrap();
        let mut again = document("d1", "docs", 99);
        again.status = DocumentStatus::Embedding;
        store.upsert_document(&again).await.unwrap();

        let got = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(got.created_at, 10);
        assert_eq!(got.status, DocumentStatus::Embedding);
        assert_eq!(store.count_by_repository("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_metadata_pagination_order() {
        let store = InMemoryMetadataStore::new();
        for (id, ts) in [("b", 2), ("a", 2), ("c", 1)] {
            store.upsert_document(&document(id, "docs", ts)).await.unwrap();
        }
        store.upsert_document(&document("x", "other", 0)).await.unwrap();

        let first = store
            .list_by_repository("docs", Page { offset: 0, limit: 2 })
            .await
            .unwrap();
        let ids: Vec<&str> = first.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let rest = store
            .list_by_repository("docs", Page { offset: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "b");
    }

    #[tokio::test]
    async fn test_set_status_missing_row() {
        let store = InMemoryMetadataStore::new();
        let err = store
            .set_status("nope", DocumentStatus::Indexed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
