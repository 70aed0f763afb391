//! TOML configuration parsing and validation.
//!
//! The configuration is the external collaborator that supplies the core
//! with a resolved set of bindings: model backends and their admission
//! limits, repositories and their models, one vector index store, and one
//! metadata database.
//!
//! ```toml
//! [db]
//! path = "./data/docindex.sqlite"
//!
//! [index_store]
//! kind = "sqlite"
//!
//! [[models]]
//! id = "mini"
//! backend = "local"
//! engine = "hashing"
//! dims = 384
//!
//! [[models]]
//! id = "te3"
//! backend = "remote"
//! flavor = "openai"
//! api_model = "text-embedding-3-small"
//! dims = 1536
//! max_in_flight = 4
//! max_queued = 64
//! requests_per_second = 10
//!
//! [[repositories]]
//! name = "docs"
//! model = "mini"
//! chunking = { kind = "paragraph", max_tokens = 256 }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use docindex_core::ChunkPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index_store: IndexStoreConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexStoreKind {
    #[default]
    Sqlite,
    /// Process-lifetime vectors. Rejected by [`Config::validate`]; an
    /// in-memory index goes through `IndexService::from_parts` instead.
    Memory,
}

/// The metadata database always outlives the process, so `indexed` rows
/// would point at vectors that vanished on restart.
pub(crate) const MEMORY_INDEX_WITH_PERSISTENT_DB: &str = "index_store.kind = \"memory\" cannot be \
combined with the persistent [db] metadata store; use kind = \"sqlite\"";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexStoreConfig {
    #[serde(default)]
    pub kind: IndexStoreKind,
    /// SQLite file for vectors. Defaults to the metadata database.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Local,
    Remote,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteFlavor {
    #[default]
    OpenAi,
    Ollama,
}

impl RemoteFlavor {
    pub fn default_url(&self) -> &'static str {
        match self {
            RemoteFlavor::OpenAi => "https://api.openai.com/v1",
            RemoteFlavor::Ollama => "http://localhost:11434",
        }
    }
}

/// One `{model identifier, execution device}` binding.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub id: String,
    pub backend: BackendType,
    pub dims: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    // local
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_device")]
    pub device: String,

    // remote
    #[serde(default)]
    pub flavor: RemoteFlavor,
    #[serde(default)]
    pub url: Option<String>,
    /// Model name sent to the API. Defaults to `id`.
    #[serde(default)]
    pub api_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,

    // admission
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default)]
    pub max_queued: Option<usize>,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

fn default_max_batch() -> usize {
    64
}
fn default_engine() -> String {
    "hashing".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}

impl ModelConfig {
    pub fn api_model(&self) -> &str {
        self.api_model.as_deref().unwrap_or(&self.id)
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(self.flavor.default_url())
    }

    /// Resolve the API key from config, then from the environment.
    ///
    /// OpenAI-flavoured backends fall back to `OPENAI_API_KEY`; Ollama needs
    /// no key unless one is configured.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        let env_name = match (&self.api_key_env, self.flavor) {
            (Some(name), _) => name.as_str(),
            (None, RemoteFlavor::OpenAi) => "OPENAI_API_KEY",
            (None, RemoteFlavor::Ollama) => return None,
        };
        std::env::var(env_name).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub chunking: ChunkPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            embed_timeout_secs: default_embed_timeout_secs(),
            store_timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_store_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: default_candidate_multiplier(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_candidate_multiplier() -> usize {
    4
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub retry_failed_transient: bool,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            retry_failed_transient: false,
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_batch_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

impl Config {
    /// Vector store file: `index_store.path` or the metadata database.
    pub fn index_store_path(&self) -> &Path {
        self.index_store.path.as_deref().unwrap_or(&self.db.path)
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        let mut model_ids = HashSet::new();
        for model in &self.models {
            if !model_ids.insert(model.id.as_str()) {
                bail!("duplicate model id: '{}'", model.id);
            }
            if model.dims == 0 {
                bail!("models.{}.dims must be > 0", model.id);
            }
            if model.max_batch == 0 {
                bail!("models.{}.max_batch must be > 0", model.id);
            }
            if model.max_in_flight == Some(0) {
                bail!("models.{}.max_in_flight must be > 0", model.id);
            }
            if model.requests_per_second == Some(0) {
                bail!("models.{}.requests_per_second must be > 0", model.id);
            }
            if model.backend == BackendType::Local && model.device != "cpu" {
                bail!(
                    "models.{}.device '{}' is not supported; only 'cpu' is available",
                    model.id,
                    model.device
                );
            }
        }

        let mut repo_names = HashSet::new();
        for repo in &self.repositories {
            if !repo_names.insert(repo.name.as_str()) {
                bail!("duplicate repository name: '{}'", repo.name);
            }
            if !model_ids.contains(repo.model.as_str()) {
                bail!(
                    "repository '{}' references unknown model '{}'",
                    repo.name,
                    repo.model
                );
            }
            match &repo.chunking {
                ChunkPolicy::Paragraph { max_tokens } if *max_tokens == 0 => {
                    bail!("repositories.{}.chunking.max_tokens must be > 0", repo.name)
                }
                ChunkPolicy::Fixed { size, overlap } if *size == 0 || overlap >= size => {
                    bail!(
                        "repositories.{}.chunking needs size > overlap",
                        repo.name
                    )
                }
                ChunkPolicy::Boundaries { .. } => bail!(
                    "repositories.{}.chunking: boundaries are supplied per document, not per repository",
                    repo.name
                ),
                _ => {}
            }
        }

        if self.retrieval.candidate_multiplier == 0 {
            bail!("retrieval.candidate_multiplier must be >= 1");
        }
        if self.pipeline.embed_timeout_secs == 0 || self.pipeline.store_timeout_secs == 0 {
            bail!("pipeline timeouts must be > 0");
        }
        if self.reconcile.interval_secs == 0 {
            bail!("reconcile.interval_secs must be > 0");
        }
        if self.index_store.kind == IndexStoreKind::Memory {
            bail!(MEMORY_INDEX_WITH_PERSISTENT_DB);
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
