//! CLI command handlers.
//!
//! Each `run_*` function builds what it needs from the loaded config, runs
//! one operation against [`IndexService`], and prints the result to stdout.

use std::path::Path;

use anyhow::{bail, Context, Result};

use docindex_core::chunk::document_id;
use docindex_core::models::{Filter, Metadata, Page};

use crate::config::Config;
use crate::ingest::IngestRequest;
use crate::service::IndexService;

/// Parse a `key=value` argument.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub async fn run_repos(config: &Config) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let repos = service.repositories().await?;
    if repos.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<16} {:<8} {:>10} {:>10}",
        "REPOSITORY", "MODEL", "INDEX", "ACTIVE", "DOCUMENTS", "VECTORS"
    );
    for repo in repos {
        println!(
            "{:<20} {:<16} {:<16} {:<8} {:>10} {:>10}",
            repo.name,
            repo.model,
            repo.index,
            if repo.active { "yes" } else { "no" },
            repo.documents,
            repo.vectors
        );
    }
    Ok(())
}

pub async fn run_ingest(
    config: &Config,
    repository: &str,
    text: Option<String>,
    file: Option<&Path>,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let content = match (text, file) {
        (Some(_), Some(_)) => bail!("pass either TEXT or --file, not both"),
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => bail!("nothing to ingest: pass TEXT or --file"),
    };
    let metadata: Metadata = meta.into_iter().collect();

    let service = IndexService::from_config(config).await?;
    let id = document_id(repository, &content);
    match service
        .ingest(IngestRequest::new(repository, content).with_metadata(metadata))
        .await
    {
        Ok(outcome) => {
            println!("id:       {}", outcome.document_id);
            println!("status:   {}", outcome.status);
            println!(
                "chunks:   {} ({} embedded, {} reused)",
                outcome.chunks, outcome.embedded, outcome.reused
            );
            Ok(())
        }
        Err(e) => {
            if let Ok(doc) = service.get_document(&id).await {
                println!("id:       {}", doc.id);
                println!("status:   {}", doc.status);
            }
            Err(e.into())
        }
    }
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let doc = service.get_document(id).await?;

    println!("--- Document ---");
    println!("id:         {}", doc.id);
    println!("repository: {}", doc.repository);
    println!("status:     {}", doc.status);
    println!("created_at: {}", format_ts(doc.created_at));
    println!("updated_at: {}", format_ts(doc.updated_at));
    println!("metadata:   {}", serde_json::to_string(&doc.metadata)?);
    println!();
    println!("--- Content ---");
    println!("{}", doc.content);
    Ok(())
}

pub async fn run_list(config: &Config, repository: &str, page: Page) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let docs = service.list_documents(repository, page).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in docs {
        let preview: String = doc.content.chars().take(60).collect();
        println!(
            "{}  {:<24} {}",
            doc.id,
            doc.status.to_string(),
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, repository: &str, id: &str) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let outcome = service.delete(repository, id).await?;
    println!(
        "Deleted {} ({} vector entries removed).",
        outcome.document_id, outcome.vectors_removed
    );
    Ok(())
}

pub async fn run_search(
    config: &Config,
    repository: &str,
    query: &str,
    top_k: Option<usize>,
    filters: Vec<(String, String)>,
) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let filter = filters
        .into_iter()
        .fold(Filter::new(), |f, (k, v)| f.with(k, v));
    let hits = service
        .search(repository, query, top_k, Some(&filter))
        .await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.document_id);
        println!("    chunk: {}", hit.sequence);
        if !hit.metadata.is_empty() {
            println!("    metadata: {}", serde_json::to_string(&hit.metadata)?);
        }
        println!();
    }
    Ok(())
}

pub async fn run_reconcile(config: &Config, watch: bool) -> Result<()> {
    let service = IndexService::from_config(config).await?;
    let reconciler = service.reconciler();

    if !watch {
        let report = reconciler.reconcile_once().await?;
        println!(
            "Scanned {}, repaired {}, skipped {}, failed {}.",
            report.scanned, report.repaired, report.skipped, report.failed
        );
        return Ok(());
    }

    let handle = reconciler.spawn();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    handle.shutdown().await;
    Ok(())
}
