//! Bridge lifecycle and operational events.
//!
//! The design note that redesigns "event emitter" as "message channel" is
//! realized here with a `tokio::sync::broadcast` channel rather than a
//! callback/observer registry: this is a library a host awaits, not one
//! that installs callbacks into.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::sql::ParamValue;

/// Every event the bridge can emit. Variant names are deliberately the
/// domain event, not the namespaced string — `wire_name` applies the
/// `ruvector:` prefix and the `namespace:action` shape a host subscriber
/// expects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum BridgeEvent {
    ConnectionOpened {
        connection_id: String,
        server_version: Option<String>,
        ruvector_version: Option<String>,
    },
    ConnectionClosed,
    ConnectionFailed {
        reason: String,
    },
    PoolAcquired,
    PoolReleased,
    QueryStart {
        query_id: String,
        sql: String,
        params: Vec<ParamValue>,
    },
    QueryComplete {
        query_id: String,
        duration_ms: u64,
        row_count: usize,
    },
    QueryError {
        query_id: String,
        reason: String,
    },
    QuerySlow {
        query_id: String,
        duration_ms: u64,
        threshold_ms: u64,
    },
    QueryRetried {
        attempt: u32,
        sql_preview: String,
    },
    SearchCompleted {
        search_id: String,
        duration_ms: u64,
        result_count: usize,
        scanned_count: usize,
        cache_hit: bool,
    },
    VectorUpdated {
        id: JsonValue,
    },
    VectorBatchComplete {
        table: String,
        count: usize,
        duration_ms: u64,
        success_count: usize,
        failed_count: usize,
    },
    IndexCreated {
        index_name: String,
        table: String,
        column: String,
        index_type: String,
    },
    IndexDropped {
        index_name: String,
        table: String,
        column: String,
        index_type: String,
    },
    IndexRebuilt {
        index_name: String,
        table: String,
        column: String,
        index_type: String,
    },
    TransactionBegan {
        transaction_id: String,
    },
    TransactionSavepoint {
        transaction_id: String,
        name: String,
    },
    TransactionRollbackToSavepoint {
        transaction_id: String,
        name: String,
    },
    TransactionReleaseSavepoint {
        transaction_id: String,
        name: String,
    },
    TransactionCommitted {
        transaction_id: String,
        query_count: u32,
        duration_ms: u64,
    },
    TransactionRolledBack {
        transaction_id: String,
        query_count: u32,
        duration_ms: u64,
    },
    StreamPaused {
        reason: String,
    },
    StreamResumed,
    StreamAborted {
        reason: String,
    },
    Shutdown,
}

impl BridgeEvent {
    /// The `ruvector:`-namespaced wire name, matching the host event bus's
    /// `namespace:action` taxonomy.
    pub fn wire_name(&self) -> &'static str {
        match self {
            BridgeEvent::ConnectionOpened { .. } => "ruvector:connection:open",
            BridgeEvent::ConnectionClosed => "ruvector:connection:close",
            BridgeEvent::ConnectionFailed { .. } => "ruvector:connection:error",
            BridgeEvent::PoolAcquired => "ruvector:connection:pool_acquired",
            BridgeEvent::PoolReleased => "ruvector:connection:pool_released",
            BridgeEvent::QueryStart { .. } => "ruvector:query:start",
            BridgeEvent::QueryComplete { .. } => "ruvector:query:complete",
            BridgeEvent::QueryError { .. } => "ruvector:query:error",
            BridgeEvent::QuerySlow { .. } => "ruvector:query:slow",
            BridgeEvent::QueryRetried { .. } => "ruvector:query:retried",
            BridgeEvent::SearchCompleted { .. } => "ruvector:search:complete",
            BridgeEvent::VectorUpdated { .. } => "ruvector:vector:updated",
            BridgeEvent::VectorBatchComplete { .. } => "ruvector:vector:batch_complete",
            BridgeEvent::IndexCreated { .. } => "ruvector:index:created",
            BridgeEvent::IndexDropped { .. } => "ruvector:index:dropped",
            BridgeEvent::IndexRebuilt { .. } => "ruvector:index:rebuilt",
            BridgeEvent::TransactionBegan { .. } => "ruvector:transaction:begin",
            BridgeEvent::TransactionSavepoint { .. } => "ruvector:transaction:savepoint",
            BridgeEvent::TransactionRollbackToSavepoint { .. } => {
                "ruvector:transaction:rollback_to_savepoint"
            }
            BridgeEvent::TransactionReleaseSavepoint { .. } => {
                "ruvector:transaction:release_savepoint"
            }
            BridgeEvent::TransactionCommitted { .. } => "ruvector:transaction:commit",
            BridgeEvent::TransactionRolledBack { .. } => "ruvector:transaction:rollback",
            BridgeEvent::StreamPaused { .. } => "ruvector:stream:paused",
            BridgeEvent::StreamResumed => "ruvector:stream:resumed",
            BridgeEvent::StreamAborted { .. } => "ruvector:stream:abort",
            BridgeEvent::Shutdown => "ruvector:shutdown",
        }
    }
}

/// A channel-backed event bus. Cloning shares the same underlying sender.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BridgeEvent>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender: Arc::new(sender) }
    }

    /// Subscribes to future events. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. Never fails or blocks the caller: with no
    /// subscribers this is a no-op, and a full channel silently drops the
    /// oldest buffered event (standard `broadcast` lagging behavior,
    /// surfaced to slow subscribers as `RecvError::Lagged`).
    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
