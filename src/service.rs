//! The assembled indexing service.
//!
//! [`IndexService`] wires configuration, stores, the model router, and the
//! coordinators together. It is what the CLI drives, and what an embedding
//! application would hold. No global state: every collaborator is owned here
//! and shared through `Arc`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use docindex_core::error::{IndexError, IndexResult};
use docindex_core::models::{Document, Filter, Page, Repository};
use docindex_core::store::{MetadataStore, VectorIndex};

use crate::config::{
    Config, IndexStoreKind, PipelineConfig, ReconcileConfig, RetrievalConfig,
    MEMORY_INDEX_WITH_PERSISTENT_DB,
};
use crate::db;
use crate::ingest::{with_store_retry, DeleteOutcome, IngestOutcome, IngestRequest, IngestionCoordinator};
use crate::locks::DocumentLocks;
use crate::migrate::{migrate_metadata, migrate_vectors};
use crate::query::{QueryCoordinator, SearchHit};
use crate::reconcile::{ReconcilePolicy, Reconciler};
use crate::router::{ModelRouter, RetryPolicy};
use crate::sqlite_store::{SqliteMetadataStore, SqliteVectorIndex};

/// Explicit collaborators for [`IndexService::from_parts`].
pub struct ServiceParts {
    pub metadata: Arc<dyn MetadataStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub router: ModelRouter,
    pub pipeline: PipelineConfig,
    pub retrieval: RetrievalConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositorySummary {
    pub name: String,
    pub model: String,
    pub index: String,
    pub active: bool,
    pub documents: usize,
    pub vectors: usize,
}

pub struct IndexService {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    router: Arc<ModelRouter>,
    ingest: Arc<IngestionCoordinator>,
    query: QueryCoordinator,
    reconciler: Arc<Reconciler>,
    store_retry: RetryPolicy,
    default_top_k: usize,
}

impl IndexService {
    /// Connect the configured stores, run migrations, bind every model, and
    /// register every configured repository.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate_metadata(&pool).await?;
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool.clone()));

        let vectors: Arc<dyn VectorIndex> = match config.index_store.kind {
            IndexStoreKind::Sqlite => {
                let index_pool = if config.index_store_path() == config.db.path.as_path() {
                    pool
                } else {
                    db::connect_path(config.index_store_path()).await?
                };
                migrate_vectors(&index_pool).await?;
                Arc::new(SqliteVectorIndex::new(index_pool))
            }
            IndexStoreKind::Memory => bail!(MEMORY_INDEX_WITH_PERSISTENT_DB),
        };

        let router = ModelRouter::from_config(config).context("Failed to bind model backends")?;

        let service = Self::from_parts(ServiceParts {
            metadata,
            vectors,
            router,
            pipeline: config.pipeline.clone(),
            retrieval: config.retrieval.clone(),
            reconcile: config.reconcile.clone(),
        });

        for repo in &config.repositories {
            let record = Repository::new(&repo.name, &repo.model)
                .with_index(repo.index.clone().unwrap_or_else(|| repo.name.clone()))
                .with_chunking(repo.chunking.clone());
            service
                .register_repository(record)
                .await
                .with_context(|| format!("Failed to register repository '{}'", repo.name))?;
        }

        info!(
            index_store = service.vectors.name(),
            repositories = config.repositories.len(),
            models = config.models.len(),
            "index service ready"
        );
        Ok(service)
    }

    pub fn from_parts(parts: ServiceParts) -> Self {
        let router = Arc::new(parts.router);
        let locks = Arc::new(DocumentLocks::new());
        let store_retry = RetryPolicy {
            attempt_timeout: parts.pipeline.store_timeout(),
            ..RetryPolicy::from_config(&parts.pipeline)
        };

        let ingest = Arc::new(IngestionCoordinator::new(
            Arc::clone(&parts.metadata),
            Arc::clone(&parts.vectors),
            Arc::clone(&router),
            locks,
            store_retry,
        ));
        let query = QueryCoordinator::new(
            Arc::clone(&parts.metadata),
            Arc::clone(&parts.vectors),
            Arc::clone(&router),
            store_retry,
            parts.retrieval.candidate_multiplier,
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&parts.metadata),
            Arc::clone(&ingest),
            ReconcilePolicy::from_config(&parts.reconcile),
        ));

        Self {
            metadata: parts.metadata,
            vectors: parts.vectors,
            router,
            ingest,
            query,
            reconciler,
            store_retry,
            default_top_k: parts.retrieval.default_top_k,
        }
    }

    /// Create or confirm a repository binding.
    ///
    /// A repository's model, namespace, and chunking are fixed once it holds
    /// documents; re-registering it with a different binding fails. The
    /// stored `active` flag is kept.
    pub async fn register_repository(&self, repo: Repository) -> IndexResult<Repository> {
        self.router.resolve(&repo.model)?;

        let existing = with_store_retry(&self.store_retry, "get_repository", || {
            self.metadata.get_repository(&repo.name)
        })
        .await?;

        let record = match existing {
            Some(current) if current.same_binding(&repo) => return Ok(current),
            Some(current) => {
                let documents = self.metadata.count_by_repository(&current.name).await?;
                if documents > 0 {
                    return Err(IndexError::Configuration(format!(
                        "repository '{}' holds {} documents; its model, index, and chunking cannot change",
                        current.name, documents
                    )));
                }
                Repository {
                    active: current.active,
                    created_at: current.created_at,
                    ..repo
                }
            }
            None => repo,
        };

        with_store_retry(&self.store_retry, "upsert_repository", || {
            self.metadata.upsert_repository(&record)
        })
        .await?;
        info!(repository = %record.name, model = %record.model, index = %record.index, "registered repository");
        Ok(record)
    }

    pub async fn ingest(&self, request: IngestRequest) -> IndexResult<IngestOutcome> {
        self.ingest.ingest(request).await
    }

    pub async fn delete(&self, repository: &str, document_id: &str) -> IndexResult<DeleteOutcome> {
        self.ingest.delete(repository, document_id).await
    }

    /// Search `repository`. `top_k` defaults to `[retrieval] default_top_k`.
    pub async fn search(
        &self,
        repository: &str,
        query: &str,
        top_k: Option<usize>,
        filter: Option<&Filter>,
    ) -> IndexResult<Vec<SearchHit>> {
        self.query
            .search(repository, query, top_k.unwrap_or(self.default_top_k), filter)
            .await
    }

    pub async fn get_document(&self, id: &str) -> IndexResult<Document> {
        with_store_retry(&self.store_retry, "get_document", || {
            self.metadata.get_document(id)
        })
        .await?
        .ok_or_else(|| IndexError::NotFound(format!("document {}", id)))
    }

    pub async fn list_documents(&self, repository: &str, page: Page) -> IndexResult<Vec<Document>> {
        if self.metadata.get_repository(repository).await?.is_none() {
            return Err(IndexError::NotFound(format!("repository {}", repository)));
        }
        Ok(self.metadata.list_by_repository(repository, page).await?)
    }

    pub async fn repositories(&self) -> IndexResult<Vec<RepositorySummary>> {
        let mut summaries = Vec::new();
        for repo in self.metadata.list_repositories().await? {
            summaries.push(RepositorySummary {
                documents: self.metadata.count_by_repository(&repo.name).await?,
                vectors: self.vectors.count(&repo.index).await?,
                name: repo.name,
                model: repo.model,
                index: repo.index,
                active: repo.active,
            });
        }
        Ok(summaries)
    }

    /// Soft-deactivate: new ingestion is refused; search, get, and delete
    /// keep working on the existing data.
    pub async fn deactivate_repository(&self, name: &str) -> IndexResult<()> {
        self.metadata.set_repository_active(name, false).await?;
        info!(repository = name, "deactivated repository");
        Ok(())
    }

    pub async fn activate_repository(&self, name: &str) -> IndexResult<()> {
        self.metadata.set_repository_active(name, true).await?;
        Ok(())
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }
}
