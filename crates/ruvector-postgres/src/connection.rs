//! Connection pooling, retried query execution, and health reporting.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use ruvector_common::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::events::{BridgeEvent, EventBus};
use crate::metrics::Metrics;
use crate::sql::ParamValue;

/// Point-in-time snapshot of the pool's connection accounting.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub num_idle: u32,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl PoolStats {
    pub fn num_active(&self) -> u32 {
        self.size.saturating_sub(self.num_idle)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.size as f64 / self.max_connections as f64
    }
}

/// Outcome of a successful `initialize()` call: the server this bridge is
/// now talking to, and whether the `ruvector` extension (not just
/// `pgvector`) is present.
#[derive(Debug, Clone)]
pub struct ConnectionInit {
    pub connection_id: String,
    pub ready: bool,
    pub server_version: String,
    pub ruvector_version: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

/// Owns the pgvector-backed connection pool, its retry policy, and the
/// metrics/event plumbing every query passes through.
///
/// `initialize` must succeed before any other method is used; every method
/// other than `initialize`/`is_healthy` returns `Error::NotInitialized`
/// when called on a manager that never connected. The pool lives behind a
/// `OnceLock` rather than a plain field so the manager can be shared as an
/// `Arc<ConnectionManager>` across vector ops, streaming, and the bridge
/// facade, with `initialize` and `query`/`execute` all taking `&self`.
pub struct ConnectionManager {
    config: ConnectionConfig,
    pool: OnceLock<PgPool>,
    connection_id: OnceLock<String>,
    metrics: Arc<Metrics>,
    events: EventBus,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("initialized", &self.pool.get().is_some())
            .field("pool_stats", &self.pool.get().map(|_| self.pool_stats()))
            .finish()
    }
}

impl ConnectionManager {
    /// Builds an uninitialized manager. Call `initialize` before issuing
    /// any query.
    pub fn new(config: ConnectionConfig, events: EventBus) -> Self {
        let metrics = Arc::new(Metrics::new(config.pool.slow_query_threshold_ms));
        Self { config, pool: OnceLock::new(), connection_id: OnceLock::new(), metrics, events }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Establishes the connection pool, retrying with jittered exponential
    /// backoff, then probes server and `ruvector` version. A missing
    /// `ruvector` schema is not fatal: `pgvector` alone is enough to serve
    /// searches, so `ruvector_version` is simply `None` in that case.
    #[instrument(skip(self), fields(
        min_connections = self.config.pool.min_connections,
        max_connections = self.config.pool.max_connections,
    ))]
    pub async fn initialize(&self) -> Result<ConnectionInit> {
        if self.pool.get().is_some() {
            return Err(Error::ValidationError("connection manager is already initialized".into()));
        }

        if self.config.uri.is_empty() {
            return Err(Error::ValidationError("connection URI cannot be empty".into()));
        }

        info!("initializing connection pool");

        let pool_config = &self.config.pool;
        let mut pool_options = PgPoolOptions::new()
            .min_connections(pool_config.min_connections)
            .max_connections(pool_config.max_connections)
            .acquire_timeout(Duration::from_secs(pool_config.connect_timeout));

        if let Some(secs) = pool_config.max_lifetime {
            pool_options = pool_options.max_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = pool_config.idle_timeout {
            pool_options = pool_options.idle_timeout(Duration::from_secs(secs));
        }

        let connect_options = PgConnectOptions::from_str(&self.config.uri)
            .map_err(|e| Error::ConnectionFailure(format!("invalid connection URI: {e}")))?
            .statement_cache_capacity(pool_config.statement_cache_capacity);

        let pool = self
            .connect_with_retry(pool_options, connect_options, &pool_config.retry)
            .await?;

        self.verify_pgvector(&pool).await?;
        let (server_version, ruvector_version) = self.probe_versions(&pool).await?;

        let connection_id = Uuid::new_v4().to_string();
        let mut parameters = BTreeMap::new();
        parameters.insert("min_connections".into(), pool_config.min_connections.to_string());
        parameters.insert("max_connections".into(), pool_config.max_connections.to_string());

        // Can't race: `initialize` rejects a second caller up front, and
        // nothing else ever writes to these `OnceLock`s.
        let _ = self.pool.set(pool);
        let _ = self.connection_id.set(connection_id.clone());

        self.events.emit(BridgeEvent::ConnectionOpened {
            connection_id: connection_id.clone(),
            server_version: Some(server_version.clone()),
            ruvector_version: ruvector_version.clone(),
        });
        info!(ruvector_version = ?ruvector_version, "connection pool initialized");

        Ok(ConnectionInit {
            connection_id,
            ready: true,
            server_version,
            ruvector_version,
            parameters,
        })
    }

    async fn connect_with_retry(
        &self,
        pool_options: PgPoolOptions,
        connect_options: PgConnectOptions,
        retry: &crate::config::RetryConfig,
    ) -> Result<PgPool> {
        let mut last_error = None;

        for attempt in 0..=retry.max_retries {
            match pool_options.clone().connect_with(connect_options.clone()).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!(attempt, "connection established after retry");
                    }
                    return Ok(pool);
                }
                Err(e) => {
                    let reason = e.to_string();
                    last_error = Some(e);
                    if attempt < retry.max_retries {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %reason, "connection failed, retrying");
                        self.events.emit(BridgeEvent::QueryRetried {
                            attempt,
                            sql_preview: "<connect>".into(),
                        });
                        tokio::time::sleep(delay).await;
                    } else {
                        self.metrics.record_connection_error();
                        self.events.emit(BridgeEvent::ConnectionFailed { reason });
                    }
                }
            }
        }

        Err(last_error
            .map(Error::from)
            .unwrap_or_else(|| Error::ConnectionFailure("connection failed".into())))
    }

    async fn verify_pgvector(&self, pool: &PgPool) -> Result<()> {
        let row: Option<PgRow> = sqlx::query("SELECT 1 FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(pool)
            .await?;
        if row.is_none() {
            return Err(Error::ExtensionMissing("vector".into()));
        }
        Ok(())
    }

    /// Reports the server version unconditionally and the `ruvector`
    /// extension's version when the `ruvector.version()` function exists,
    /// `None` otherwise.
    async fn probe_versions(&self, pool: &PgPool) -> Result<(String, Option<String>)> {
        let row = sqlx::query(
            "SELECT version() AS server_version, \
             CASE WHEN EXISTS ( \
                 SELECT 1 FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = 'ruvector' AND p.proname = 'version' \
             ) THEN (SELECT ruvector.version()) ELSE NULL END AS ruvector_version",
        )
        .fetch_one(pool)
        .await
        .map_err(Error::from)?;

        let server_version: String = row.try_get("server_version").map_err(Error::from)?;
        let ruvector_version: Option<String> = row.try_get("ruvector_version").unwrap_or(None);
        Ok((server_version, ruvector_version))
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.get().ok_or(Error::NotInitialized)
    }

    /// Executes `sql` with `params`, retrying transient failures (SQLSTATE
    /// classes `08`/`40`/admin-shutdown `57P0x`, plus pool timeouts) with
    /// jittered exponential backoff, bounded overall by `timeout`.
    #[instrument(skip(self, params), fields(sql_preview = %sql.chars().take(80).collect::<String>()))]
    pub async fn query(
        &self,
        sql: &str,
        params: &[ParamValue],
        timeout: Option<Duration>,
    ) -> Result<Vec<PgRow>> {
        let pool = self.pool()?;
        let retry = &self.config.pool.retry;
        let deadline = timeout.unwrap_or(Duration::from_millis(self.config.pool.query_timeout_ms));
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();
        let mut last_error = None;

        self.events.emit(BridgeEvent::QueryStart { query_id: query_id.clone(), sql: sql.to_string(), params: params.to_vec() });

        for attempt in 0..=retry.max_retries {
            if started.elapsed() >= deadline {
                let reason = format!("query exceeded {}ms deadline", deadline.as_millis());
                self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: reason.clone() });
                return Err(Error::Timeout(reason));
            }

            let attempt_start = Instant::now();
            let arguments = crate::sql::bind_all(params)?;
            let query = sqlx::query_with(sql, arguments);

            let remaining = deadline.saturating_sub(started.elapsed());
            let outcome = tokio::time::timeout(remaining, query.fetch_all(pool)).await;

            match outcome {
                Ok(Ok(rows)) => {
                    let elapsed_ms = attempt_start.elapsed().as_millis() as u64;
                    self.metrics.record_query_success(elapsed_ms);
                    self.log_completion(&query_id, sql, elapsed_ms, attempt);
                    self.events.emit(BridgeEvent::QueryComplete {
                        query_id: query_id.clone(),
                        duration_ms: elapsed_ms,
                        row_count: rows.len(),
                    });
                    return Ok(rows);
                }
                Ok(Err(sqlx_err)) => {
                    let err = Error::from(sqlx_err);
                    let retryable = err.is_retryable();
                    warn!(attempt, retryable, error = %err, "query failed");
                    if retryable && attempt < retry.max_retries {
                        let delay = retry.delay_for_attempt(attempt);
                        self.events.emit(BridgeEvent::QueryRetried {
                            attempt,
                            sql_preview: sql.chars().take(80).collect(),
                        });
                        tokio::time::sleep(delay).await;
                        last_error = Some(err);
                        continue;
                    }
                    self.metrics.record_query_failure();
                    self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: err.to_string() });
                    return Err(err);
                }
                Err(_elapsed) => {
                    self.metrics.record_query_failure();
                    let reason = format!("query exceeded {}ms deadline", deadline.as_millis());
                    self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: reason.clone() });
                    return Err(Error::Timeout(reason));
                }
            }
        }

        self.metrics.record_query_failure();
        let err = last_error.unwrap_or_else(|| Error::SqlError {
            code: None,
            message: "query failed after all retries".into(),
        });
        self.events.emit(BridgeEvent::QueryError { query_id, reason: err.to_string() });
        Err(err)
    }

    /// Like `query`, but for statements with no result set (`DELETE`,
    /// plain `UPDATE`): returns the number of rows the server reports as
    /// affected instead of fetching them back.
    #[instrument(skip(self, params), fields(sql_preview = %sql.chars().take(80).collect::<String>()))]
    pub async fn execute(
        &self,
        sql: &str,
        params: &[ParamValue],
        timeout: Option<Duration>,
    ) -> Result<u64> {
        let pool = self.pool()?;
        let retry = &self.config.pool.retry;
        let deadline = timeout.unwrap_or(Duration::from_millis(self.config.pool.query_timeout_ms));
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();
        let mut last_error = None;

        self.events.emit(BridgeEvent::QueryStart { query_id: query_id.clone(), sql: sql.to_string(), params: params.to_vec() });

        for attempt in 0..=retry.max_retries {
            if started.elapsed() >= deadline {
                let reason = format!("query exceeded {}ms deadline", deadline.as_millis());
                self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: reason.clone() });
                return Err(Error::Timeout(reason));
            }

            let attempt_start = Instant::now();
            let arguments = crate::sql::bind_all(params)?;
            let query = sqlx::query_with(sql, arguments);

            let remaining = deadline.saturating_sub(started.elapsed());
            let outcome = tokio::time::timeout(remaining, query.execute(pool)).await;

            match outcome {
                Ok(Ok(result)) => {
                    let elapsed_ms = attempt_start.elapsed().as_millis() as u64;
                    self.metrics.record_query_success(elapsed_ms);
                    self.log_completion(&query_id, sql, elapsed_ms, attempt);
                    self.events.emit(BridgeEvent::QueryComplete {
                        query_id: query_id.clone(),
                        duration_ms: elapsed_ms,
                        row_count: result.rows_affected() as usize,
                    });
                    return Ok(result.rows_affected());
                }
                Ok(Err(sqlx_err)) => {
                    let err = Error::from(sqlx_err);
                    let retryable = err.is_retryable();
                    warn!(attempt, retryable, error = %err, "statement failed");
                    if retryable && attempt < retry.max_retries {
                        let delay = retry.delay_for_attempt(attempt);
                        self.events.emit(BridgeEvent::QueryRetried {
                            attempt,
                            sql_preview: sql.chars().take(80).collect(),
                        });
                        tokio::time::sleep(delay).await;
                        last_error = Some(err);
                        continue;
                    }
                    self.metrics.record_query_failure();
                    self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: err.to_string() });
                    return Err(err);
                }
                Err(_elapsed) => {
                    self.metrics.record_query_failure();
                    let reason = format!("query exceeded {}ms deadline", deadline.as_millis());
                    self.events.emit(BridgeEvent::QueryError { query_id: query_id.clone(), reason: reason.clone() });
                    return Err(Error::Timeout(reason));
                }
            }
        }

        self.metrics.record_query_failure();
        let err = last_error.unwrap_or_else(|| Error::SqlError {
            code: None,
            message: "statement failed after all retries".into(),
        });
        self.events.emit(BridgeEvent::QueryError { query_id, reason: err.to_string() });
        Err(err)
    }

    fn log_completion(&self, query_id: &str, sql: &str, elapsed_ms: u64, attempt: u32) {
        let preview: String = sql.chars().take(80).collect();
        let threshold_ms = self.config.pool.slow_query_threshold_ms;
        if self.metrics.is_slow(elapsed_ms) {
            warn!(sql = %preview, elapsed_ms, attempt, "slow query");
            self.events.emit(BridgeEvent::QuerySlow { query_id: query_id.to_string(), duration_ms: elapsed_ms, threshold_ms });
        } else {
            debug!(sql = %preview, elapsed_ms, attempt, "query completed");
        }
    }

    /// Borrows the underlying pool so callers (vector ops, streaming,
    /// transactions) can run `sqlx` calls this manager doesn't expose
    /// directly, without duplicating pool access.
    pub fn raw_pool(&self) -> Result<&PgPool> {
        self.pool()
    }

    /// Emits an event on this manager's bus, for callers (vector ops,
    /// streaming) that share its `EventBus` but don't hold their own copy.
    pub fn events_emit(&self, event: BridgeEvent) {
        self.events.emit(event);
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn acquire_client(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        let conn = self.pool()?.acquire().await.map_err(Error::from)?;
        self.metrics.record_connection_acquired();
        self.events.emit(BridgeEvent::PoolAcquired);
        Ok(conn)
    }

    /// Present for symmetry with `acquire_client`: dropping the guard
    /// already returns the connection to the pool, this only records the
    /// event/metric.
    pub fn release_client(&self, _conn: sqlx::pool::PoolConnection<sqlx::Postgres>) {
        self.metrics.record_connection_released();
        self.events.emit(BridgeEvent::PoolReleased);
    }

    /// Closes the pool in place. A `OnceLock` can't be un-set, so a manager
    /// that has been shut down stays "initialized" but every subsequent
    /// query fails against the closed pool instead of with
    /// `Error::NotInitialized` — `is_healthy` reflects this as `false`.
    /// Exactly one `connection:close` event follows, regardless of how many
    /// times `shutdown` is called.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        self.events.emit(BridgeEvent::ConnectionClosed);
        Ok(())
    }

    pub async fn is_healthy(&self) -> bool {
        match self.pool.get() {
            Some(pool) => !pool.is_closed() && sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            None => false,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        match self.pool.get() {
            Some(pool) => PoolStats {
                size: pool.size(),
                num_idle: pool.num_idle() as u32,
                max_connections: self.config.pool.max_connections,
                min_connections: self.config.pool.min_connections,
            },
            None => PoolStats {
                size: 0,
                num_idle: 0,
                max_connections: self.config.pool.max_connections,
                min_connections: self.config.pool.min_connections,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_stats_utilization() {
        let stats = PoolStats { size: 5, num_idle: 2, max_connections: 10, min_connections: 1 };
        assert_eq!(stats.num_active(), 3);
        assert_eq!(stats.utilization(), 0.5);
    }

    #[test]
    fn pool_stats_utilization_zero_max_is_zero_not_nan() {
        let stats = PoolStats { size: 0, num_idle: 0, max_connections: 0, min_connections: 0 };
        assert_eq!(stats.utilization(), 0.0);
    }

    #[tokio::test]
    async fn uninitialized_manager_rejects_query() {
        let config = ConnectionConfig::new("postgres://localhost/test");
        let manager = ConnectionManager::new(config, EventBus::new(4));
        let result = manager.query("SELECT 1", &[], None).await;
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn uninitialized_manager_is_unhealthy() {
        let config = ConnectionConfig::new("postgres://localhost/test");
        let manager = ConnectionManager::new(config, EventBus::new(4));
        assert!(!manager.is_healthy().await);
    }

    #[tokio::test]
    async fn empty_uri_rejected_before_connecting() {
        let config = ConnectionConfig::new("");
        let manager = ConnectionManager::new(config, EventBus::new(4));
        let result = manager.initialize().await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[tokio::test]
    async fn shutdown_on_uninitialized_manager_still_emits_close() {
        let config = ConnectionConfig::new("postgres://localhost/test");
        let manager = ConnectionManager::new(config, EventBus::new(4));
        let mut rx = manager.subscribe_events();
        manager.shutdown().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::ConnectionClosed));
    }
}
