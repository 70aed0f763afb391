//! # docindex
//!
//! A document-to-vector indexing service. Documents submitted to a named
//! repository are chunked, embedded by the repository's model backend, and
//! written to a vector index, while a durable metadata store records every
//! document and its indexing status.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!  ingest ─────▶│ IngestionCoordinator │──┐
//!                └──────────┬───────────┘  │
//!                           │              ▼
//!                    ┌──────▼──────┐  ┌──────────┐   ┌──────────────┐
//!                    │ ModelRouter │  │ Metadata │   │ VectorIndex  │
//!                    │ local/remote│  │ (SQLite) │   │ SQLite / mem │
//!                    └──────▲──────┘  └────▲─────┘   └──────▲───────┘
//!                           │              │                │
//!                ┌──────────┴───────────┐  │                │
//!  search ─────▶│   QueryCoordinator   │──┴────────────────┘
//!                └──────────────────────┘
//! ```
//!
//! The two stores share no transaction. Consistency comes from write order
//! (row, then vectors, then the `indexed` flip; delete in reverse) and from
//! idempotent ids, with a [`reconcile::Reconciler`] to resume interrupted
//! pipelines.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`backend`] | Local and remote [`ModelBackend`](docindex_core::backend::ModelBackend)s |
//! | [`router`] | Model routing, admission control, retries |
//! | [`sqlite_store`] | SQLite metadata store and vector index |
//! | [`locks`] | Per-document ownership tokens |
//! | [`ingest`] | Ingestion and deletion pipeline |
//! | [`query`] | Similarity search |
//! | [`reconcile`] | Background repair sweep |
//! | [`service`] | Assembled service facade |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`commands`] | CLI command handlers |

pub mod backend;
pub mod commands;
pub mod config;
pub mod db;
pub mod ingest;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod query;
pub mod reconcile;
pub mod router;
pub mod service;
pub mod sqlite_store;

pub use ingest::{DeleteOutcome, IngestOutcome, IngestRequest, IngestionCoordinator};
pub use query::{QueryCoordinator, SearchHit};
pub use router::{AdmissionLimits, ModelRouter, RetryPolicy};
pub use service::{IndexService, ServiceParts};
