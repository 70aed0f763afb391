//! Core data models used throughout docindex.
//!
//! These types represent the repositories, documents, chunks, and index
//! entries that flow through the ingestion and query pipelines.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key/value metadata attached to a document. Keys are unique.
pub type Metadata = BTreeMap<String, String>;

/// How a document's content is split into chunks.
///
/// Stored alongside every document so a retry, a reconciliation pass, or a
/// delete regenerates exactly the same chunk boundaries and vector ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Paragraph-boundary packing up to `max_tokens` (4 chars per token).
    Paragraph { max_tokens: usize },
    /// Fixed-size character windows; consecutive windows share `overlap` chars.
    Fixed { size: usize, overlap: usize },
    /// Caller-supplied byte offsets at which to cut the content.
    Boundaries { offsets: Vec<usize> },
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        ChunkPolicy::Paragraph { max_tokens: 256 }
    }
}

/// A logical index namespace binding a model and an index store namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    /// Model identifier resolved through the model router.
    pub model: String,
    /// Namespace inside the vector index store.
    pub index: String,
    pub chunking: ChunkPolicy,
    pub active: bool,
    pub created_at: i64,
}

impl Repository {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            index: name.clone(),
            name,
            model: model.into(),
            chunking: ChunkPolicy::default(),
            active: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkPolicy) -> Self {
        self.chunking = chunking;
        self
    }

    /// True when `other` binds the same model, namespace, and chunking.
    ///
    /// `active` and `created_at` are not part of the binding.
    pub fn same_binding(&self, other: &Repository) -> bool {
        self.model == other.model && self.index == other.index && self.chunking == other.chunking
    }
}

/// Why a document ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    EmbeddingTransient,
    EmbeddingPermanent,
    Backpressure,
    StoreUnavailable,
    StoreRejected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::EmbeddingTransient => "embedding-transient",
            FailureReason::EmbeddingPermanent => "embedding-permanent",
            FailureReason::Backpressure => "backpressure",
            FailureReason::StoreUnavailable => "store-unavailable",
            FailureReason::StoreRejected => "store-rejected",
        }
    }

    /// Reasons a later attempt may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailureReason::EmbeddingTransient
                | FailureReason::Backpressure
                | FailureReason::StoreUnavailable
        )
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedding-transient" => Ok(FailureReason::EmbeddingTransient),
            "embedding-permanent" => Ok(FailureReason::EmbeddingPermanent),
            "backpressure" => Ok(FailureReason::Backpressure),
            "store-unavailable" => Ok(FailureReason::StoreUnavailable),
            "store-rejected" => Ok(FailureReason::StoreRejected),
            other => Err(format!("unknown failure reason: {other}")),
        }
    }
}

/// Indexing status of a document.
///
/// Persisted as `pending`, `embedding`, `indexed`, or `failed:<reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    Pending,
    Embedding,
    Indexed,
    Failed(FailureReason),
}

impl DocumentStatus {
    pub fn is_indexed(&self) -> bool {
        matches!(self, DocumentStatus::Indexed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Pending => f.write_str("pending"),
            DocumentStatus::Embedding => f.write_str("embedding"),
            DocumentStatus::Indexed => f.write_str("indexed"),
            DocumentStatus::Failed(reason) => write!(f, "failed:{}", reason.as_str()),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "embedding" => Ok(DocumentStatus::Embedding),
            "indexed" => Ok(DocumentStatus::Indexed),
            other => match other.strip_prefix("failed:") {
                Some(reason) => Ok(DocumentStatus::Failed(reason.parse()?)),
                None => Err(format!("unknown document status: {other}")),
            },
        }
    }
}

impl Serialize for DocumentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocumentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A unit of content submitted for indexing, keyed by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub repository: String,
    pub content: String,
    pub metadata: Metadata,
    pub status: DocumentStatus,
    /// Effective chunking policy for this document.
    pub chunking: ChunkPolicy,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A deterministic sub-span of a document, the unit of embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    pub sequence: u32,
    pub text: String,
    /// SHA-256 of `text`, used to detect unchanged chunks on retry.
    pub hash: String,
    pub vector_id: String,
}

/// The data an index entry carries besides its vector.
///
/// Enough to map a hit back to its document without a join. Everything else
/// about the document is read from the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub repository: String,
    pub document_id: String,
    pub sequence: u32,
    pub chunk_hash: String,
    pub model: String,
    #[serde(default)]
    pub attributes: Metadata,
}

/// One vector store record, keyed by the chunk's derived vector id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector_id: String,
    pub vector: Vec<f32>,
    pub payload: EntryPayload,
}

/// A nearest-neighbour result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub vector_id: String,
    pub score: f32,
    pub payload: EntryPayload,
}

/// Attribute-equality filter applied by the vector index.
///
/// Every listed key must be present in the entry's attributes with exactly
/// the listed value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub equals: Metadata,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, attributes: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| attributes.get(k).map(|a| a == v).unwrap_or(false))
    }
}

/// Offset-based pagination for listing documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}
