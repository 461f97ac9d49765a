//! Rowforge Engine Library
//!
//! This crate orchestrates matching runs over the pure core:
//! - Store seams for configurations, documents, and instances
//! - In-memory and Postgres store implementations
//! - TTL-cached rule resolution
//! - The batched, transaction-per-batch matching engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Rule     │────▶│  Matching   │────▶│  Instance   │
//! │  Resolver   │     │   Engine    │     │   Store     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! The transform and validation semantics live in `rowforge-core`; this
//! crate adds I/O, caching, batching, and lifecycle enforcement.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod resolver;
pub mod store;

pub use engine::{
    BatchProgress, DocStatus, DocumentMatchResult, MatchOptions, MatchReport, MatchingEngine,
    PreviewReport,
};
pub use error::{Error, Result};
pub use resolver::{DEFAULT_CACHE_TTL, ResolverCache, RuleResolver};
pub use store::{
    ConfigStore, DocumentStore, ExtractedDocument, InstanceStats, InstanceStore,
    memory::MemoryStore, postgres::PgStore,
};
