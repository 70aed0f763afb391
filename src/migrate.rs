use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_metadata(&pool).await?;

    if config.index_store.kind == crate::config::IndexStoreKind::Sqlite {
        let index_pool = if config.index_store_path() == config.db.path.as_path() {
            pool.clone()
        } else {
            db::connect_path(config.index_store_path()).await?
        };
        migrate_vectors(&index_pool).await?;
        index_pool.close().await;
    }

    pool.close().await;
    Ok(())
}

/// Tables for repositories and documents.
pub async fn migrate_metadata(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            name TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            index_name TEXT NOT NULL,
            chunking_json TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            chunking_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_repository ON documents(repository, created_at, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status, updated_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Tables for vector entries, partitioned by namespace, and the dimension
/// each non-empty namespace is pinned to.
pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            namespace TEXT NOT NULL,
            vector_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            payload_json TEXT NOT NULL,
            PRIMARY KEY (namespace, vector_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_namespaces (
            namespace TEXT PRIMARY KEY,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases written before the namespace table existed.
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO vector_namespaces (namespace, dims)
        SELECT namespace, MIN(dims) FROM vector_entries GROUP BY namespace
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
