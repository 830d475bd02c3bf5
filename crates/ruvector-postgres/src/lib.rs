//! A pgvector-backed vector search and ingestion bridge over PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//!              RuVectorBridge (bridge.rs)
//!           /         |          \
//! VectorOperations  StreamingEngine  TransactionContext
//!           \         |          /
//!              ConnectionManager (connection.rs)
//!                      |
//!                    SQLx (PostgreSQL driver + pgvector)
//! ```
//!
//! # Key features
//!
//! - **Vector search**: cosine, Euclidean, inner-product, Hamming, Manhattan,
//!   plus seven fallback metrics for exotic pgvector operator classes, with
//!   `hnsw`, `ivfflat`, `ivfpq`, `diskann`, and brute-force `flat` index
//!   types.
//! - **Typed SQL composition**: every identifier is validated, every scalar
//!   value is parameter-bound; only query vectors and distance operators are
//!   inlined, since pgvector can't bind a vector literal as a parameter.
//! - **Resilient connection pooling**: jittered exponential backoff on both
//!   connect and query, with a hard per-query deadline and a version probe
//!   (server + `ruvector` extension) on every `initialize()`.
//! - **Transactions with savepoints**: isolation level, access mode, and
//!   `DEFERRABLE` control, a tracked savepoint stack, and a `Drop` impl that
//!   rolls back (and reports it) if a context is dropped uncommitted.
//! - **Cursor and pagination streaming**: server-side `WITH HOLD` cursors or
//!   `LIMIT`/`OFFSET` pages for search results that don't fit comfortably in
//!   memory, plus backpressured batch inserts with real pause/resume/abort
//!   control.
//! - **Observability**: per-bridge metrics (Prometheus/JSON export) and a
//!   broadcast event channel namespaced `ruvector:<area>:<action>`, never a
//!   process-global singleton.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod events;
pub mod metrics;
pub mod sql;
pub mod streaming;
pub mod transaction;
pub mod vector;
pub mod vector_ops;

pub use bridge::RuVectorBridge;
pub use config::{ConnectionConfig, PoolConfig, RetryConfig};
pub use connection::{ConnectionInit, ConnectionManager, PoolStats};
pub use events::{BridgeEvent, EventBus};
pub use metrics::{Metrics, MetricsSnapshot};
pub use sql::{
    BuiltQuery, IndexOptions, InsertOptions, InsertRow, ParamValue, SearchOptions,
};
pub use streaming::{StreamControl, StreamInsertOptions, StreamMode, StreamSearchOptions, StreamingEngine};
pub use transaction::{AccessMode, IsolationLevel, TransactionContext, TransactionOptions};
pub use vector::{DistanceMetric, IndexType, Vector};
pub use vector_ops::{
    BatchError, BatchResult, BatchSearchItem, BatchSearchOutcome, BridgeStats, CacheStats,
    IndexStats, IndexSummary, SearchResult, TableStats, VectorOperations,
};

pub use ruvector_common::{Error, Result};
