//! SQLite-backed [`MetadataStore`] and [`VectorIndex`] implementations.
//!
//! Both share the migration scheme in [`crate::migrate`] and may live in the
//! same database file or in separate ones. Vectors are stored as
//! little-endian `f32` BLOBs; queries are brute-force cosine similarity over
//! one namespace.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docindex_core::embedding::{decode_vector, encode_vector, QueryVector};
use docindex_core::error::{StoreError, StoreResult};
use docindex_core::models::{
    ChunkPolicy, Document, DocumentStatus, EntryPayload, Filter, IndexEntry, Metadata, Page,
    Repository, VectorHit,
};
use docindex_core::store::{check_dimensions, rank_hits, MetadataStore, VectorIndex};

/// Classify a driver error as retryable or not.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            if msg.contains("locked") || msg.contains("busy") {
                StoreError::Unavailable(err.to_string())
            } else if db.is_unique_violation() {
                StoreError::Conflict(err.to_string())
            } else {
                StoreError::Rejected(err.to_string())
            }
        }
        _ => StoreError::Rejected(err.to_string()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Rejected(format!("corrupt {} column: {}", column, e)))
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Rejected(e.to_string()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ============ Metadata ============

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &SqliteRow) -> StoreResult<Document> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(map_sqlx)?;
    let chunking_json: String = row.try_get("chunking_json").map_err(map_sqlx)?;

    Ok(Document {
        id: row.try_get("id").map_err(map_sqlx)?,
        repository: row.try_get("repository").map_err(map_sqlx)?,
        content: row.try_get("content").map_err(map_sqlx)?,
        metadata: decode::<Metadata>("metadata_json", &metadata_json)?,
        status: status
            .parse::<DocumentStatus>()
            .map_err(StoreError::Rejected)?,
        chunking: decode::<ChunkPolicy>("chunking_json", &chunking_json)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

fn repository_from_row(row: &SqliteRow) -> StoreResult<Repository> {
    let chunking_json: String = row.try_get("chunking_json").map_err(map_sqlx)?;
    let active: i64 = row.try_get("active").map_err(map_sqlx)?;
    Ok(Repository {
        name: row.try_get("name").map_err(map_sqlx)?,
        model: row.try_get("model").map_err(map_sqlx)?,
        index: row.try_get("index_name").map_err(map_sqlx)?,
        chunking: decode::<ChunkPolicy>("chunking_json", &chunking_json)?,
        active: active != 0,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, repository, content, metadata_json, status, chunking_json, created_at, updated_at";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert_document(&self, doc: &Document) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, repository, content, metadata_json, status,
                                   chunking_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                repository = excluded.repository,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                status = excluded.status,
                chunking_json = excluded.chunking_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.repository)
        .bind(&doc.content)
        .bind(encode(&doc.metadata)?)
        .bind(doc.status.to_string())
        .bind(encode(&doc.chunking)?)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_repository(&self, repository: &str, page: Page) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE repository = ? ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        ))
        .bind(repository)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn list_by_status(
        &self,
        statuses: &[DocumentStatus],
        updated_before: i64,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        if statuses.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM documents WHERE status IN ({}) AND updated_at <= ? ORDER BY updated_at ASC, id ASC LIMIT ?",
            DOCUMENT_COLUMNS,
            placeholders(statuses.len())
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.to_string());
        }
        let rows = query
            .bind(updated_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn count_by_repository(&self, repository: &str) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE repository = ?")
            .bind(repository)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(count as usize)
    }

    async fn upsert_repository(&self, repo: &Repository) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (name, model, index_name, chunking_json, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                model = excluded.model,
                index_name = excluded.index_name,
                chunking_json = excluded.chunking_json,
                active = excluded.active
            "#,
        )
        .bind(&repo.name)
        .bind(&repo.model)
        .bind(&repo.index)
        .bind(encode(&repo.chunking)?)
        .bind(repo.active as i64)
        .bind(repo.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_repository(&self, name: &str) -> StoreResult<Option<Repository>> {
        let row = sqlx::query(
            "SELECT name, model, index_name, chunking_json, active, created_at FROM repositories WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(repository_from_row).transpose()
    }

    async fn list_repositories(&self) -> StoreResult<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT name, model, index_name, chunking_json, active, created_at FROM repositories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(repository_from_row).collect()
    }

    async fn set_repository_active(&self, name: &str, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE repositories SET active = ? WHERE name = ?")
            .bind(active as i64)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("repository {}", name)));
        }
        Ok(())
    }
}

// ============ Vectors ============

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn namespace_dims<'e, E>(executor: E, namespace: &str) -> StoreResult<Option<usize>>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_namespaces WHERE namespace = ?")
                .bind(namespace)
                .fetch_optional(executor)
                .await
                .map_err(map_sqlx)?;
        Ok(dims.map(|d| d as usize))
    }
}

fn entry_from_row(row: &SqliteRow) -> StoreResult<IndexEntry> {
    let vector_id: String = row.try_get("vector_id").map_err(map_sqlx)?;
    let dims: i64 = row.try_get("dims").map_err(map_sqlx)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(map_sqlx)?;
    let payload_json: String = row.try_get("payload_json").map_err(map_sqlx)?;
    let vector = decode_vector(&blob, dims as usize).ok_or_else(|| {
        StoreError::Rejected(format!(
            "vector '{vector_id}' has {} bytes, expected {dims} dims",
            blob.len()
        ))
    })?;
    Ok(IndexEntry {
        vector_id,
        vector,
        payload: decode::<EntryPayload>("payload_json", &payload_json)?,
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // Claiming the namespace is the transaction's first write, so it holds
        // the write lock before the dimension is read back.
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(
            "INSERT INTO vector_namespaces (namespace, dims) VALUES (?, ?) ON CONFLICT(namespace) DO NOTHING",
        )
        .bind(namespace)
        .bind(entries[0].vector.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        check_dimensions(Self::namespace_dims(&mut *tx, namespace).await?, entries)?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (namespace, vector_id, dims, embedding, payload_json)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(namespace, vector_id) DO UPDATE SET
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    payload_json = excluded.payload_json
                "#,
            )
            .bind(namespace)
            .bind(&entry.vector_id)
            .bind(entry.vector.len() as i64)
            .bind(encode_vector(&entry.vector))
            .bind(encode(&entry.payload)?)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> StoreResult<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = Self::namespace_dims(&self.pool, namespace).await? {
            if dims != vector.len() {
                return Err(StoreError::Rejected(format!(
                    "query has {} dims, namespace '{}' has {}",
                    vector.len(),
                    namespace,
                    dims
                )));
            }
        }

        let rows = sqlx::query(
            "SELECT vector_id, dims, embedding, payload_json FROM vector_entries WHERE namespace = ?",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let query = QueryVector::new(vector);
        let mut hits = Vec::new();
        for row in &rows {
            let entry = entry_from_row(row)?;
            if let Some(filter) = filter {
                if !filter.matches(&entry.payload.attributes) {
                    continue;
                }
            }
            hits.push(VectorHit {
                score: query.score(&entry.vector),
                vector_id: entry.vector_id,
                payload: entry.payload,
            });
        }

        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<Vec<IndexEntry>> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT vector_id, dims, embedding, payload_json FROM vector_entries WHERE namespace = ? AND vector_id IN ({}) ORDER BY vector_id",
            placeholders(vector_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(namespace);
        for id in vector_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn delete(&self, namespace: &str, vector_ids: &[String]) -> StoreResult<usize> {
        if vector_ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut removed = 0;
        for id in vector_ids {
            removed += sqlx::query("DELETE FROM vector_entries WHERE namespace = ? AND vector_id = ?")
                .bind(namespace)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?
                .rows_affected();
        }
        // An emptied namespace no longer pins a dimension.
        sqlx::query(
            "DELETE FROM vector_namespaces WHERE namespace = ? AND NOT EXISTS (SELECT 1 FROM vector_entries WHERE namespace = ?)",
        )
        .bind(namespace)
        .bind(namespace)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(removed as usize)
    }

    async fn count(&self, namespace: &str) -> StoreResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_entries WHERE namespace = ?")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(count as usize)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
