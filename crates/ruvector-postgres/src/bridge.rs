//! Top-level facade wiring connection management, vector operations,
//! streaming, metrics, and events into one handle.

use std::sync::Arc;

use ruvector_common::Result;

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionInit, ConnectionManager, PoolStats};
use crate::events::{BridgeEvent, EventBus};
use crate::metrics::MetricsSnapshot;
use crate::streaming::StreamingEngine;
use crate::transaction::{IsolationLevel, TransactionContext, TransactionOptions};
use crate::vector_ops::VectorOperations;

/// The entry point applications construct: one bridge per pgvector-backed
/// database the process talks to.
pub struct RuVectorBridge {
    connections: Arc<ConnectionManager>,
    vectors: VectorOperations,
    streaming: StreamingEngine,
    events: EventBus,
}

impl RuVectorBridge {
    /// Builds an unconnected bridge. Call `initialize` before issuing any
    /// operation.
    pub fn new(config: ConnectionConfig) -> Self {
        let events = EventBus::default();
        let connections = Arc::new(ConnectionManager::new(config, events.clone()));
        let vectors = VectorOperations::new(connections.clone());
        let streaming = StreamingEngine::new(connections.clone());
        Self { connections, vectors, streaming, events }
    }

    pub async fn initialize(&self) -> Result<ConnectionInit> {
        self.connections.initialize().await
    }

    pub fn vectors(&self) -> &VectorOperations {
        &self.vectors
    }

    pub fn streaming(&self) -> &StreamingEngine {
        &self.streaming
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.connections.metrics().snapshot()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn is_healthy(&self) -> bool {
        self.connections.is_healthy().await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.connections.pool_stats()
    }

    pub async fn begin_transaction(&self, isolation_level: IsolationLevel) -> Result<TransactionContext> {
        let pool = self.connections.raw_pool()?;
        let tx = TransactionContext::begin(pool, isolation_level).await?.with_events(self.events.clone());
        self.events.emit(BridgeEvent::TransactionBegan { transaction_id: tx.transaction_id().to_string() });
        Ok(tx)
    }

    pub async fn begin_transaction_with_options(&self, options: TransactionOptions) -> Result<TransactionContext> {
        let pool = self.connections.raw_pool()?;
        let tx = TransactionContext::begin_with_options(pool, options)
            .await?
            .with_events(self.events.clone());
        self.events.emit(BridgeEvent::TransactionBegan { transaction_id: tx.transaction_id().to_string() });
        Ok(tx)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let result = self.connections.shutdown().await;
        self.events.emit(BridgeEvent::Shutdown);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconnected_bridge_is_unhealthy() {
        let bridge = RuVectorBridge::new(ConnectionConfig::new("postgres://localhost/test"));
        assert!(!bridge.is_healthy().await);
    }

    #[tokio::test]
    async fn unconnected_bridge_pool_stats_are_zeroed() {
        let bridge = RuVectorBridge::new(ConnectionConfig::new("postgres://localhost/test"));
        let stats = bridge.pool_stats();
        assert_eq!(stats.size, 0);
    }
}
