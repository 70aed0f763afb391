//! # docindex core
//!
//! Runtime-free logic shared by every docindex frontend: the data model,
//! deterministic chunking and id derivation, the error taxonomy, and the
//! three capability traits the coordinators are written against.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Concrete backends and the SQLite stores live in the `docindex` app crate;
//! the in-memory stores in [`store::memory`] are complete implementations
//! used by tests and embedded deployments.

pub mod backend;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;

pub use error::{EmbedError, IndexError, StoreError};
pub use models::{
    Chunk, ChunkPolicy, Document, DocumentStatus, FailureReason, IndexEntry, Repository,
};
