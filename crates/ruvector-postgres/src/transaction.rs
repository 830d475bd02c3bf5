//! Transaction scoping with savepoints.
//!
//! Operations run through a `TransactionContext` never go through the
//! connection manager's retry policy: retrying a statement that already
//! ran inside an open transaction risks re-applying it, so callers that
//! want retries must retry the whole transaction themselves.

use std::time::Instant;

use ruvector_common::{Error, Result};
use sqlx::Postgres;
use uuid::Uuid;

use crate::events::{BridgeEvent, EventBus};
use crate::sql::{self, BuiltQuery, InsertOptions, InsertRow, ParamValue, SearchOptions};
use crate::vector::Vector;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn to_sql(self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Options passed to `TransactionContext::begin_with_options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: AccessMode,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn read_write(mut self) -> Self {
        self.access_mode = AccessMode::ReadWrite;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    pub fn to_sql(&self) -> String {
        let mut parts = vec![
            format!("ISOLATION LEVEL {}", self.isolation_level.to_sql()),
            self.access_mode.to_sql().to_string(),
        ];
        if self.isolation_level == IsolationLevel::Serializable
            && self.access_mode == AccessMode::ReadOnly
        {
            parts.push(if self.deferrable { "DEFERRABLE".into() } else { "NOT DEFERRABLE".into() });
        }
        format!("SET TRANSACTION {}", parts.join(", "))
    }
}

/// A live transaction plus the stack of savepoints opened within it.
///
/// Open Question (resolved): `rollback_to_savepoint` discards every
/// savepoint opened *after* the target from the live set but keeps the
/// target itself live, matching PostgreSQL's own `ROLLBACK TO SAVEPOINT`
/// semantics (the savepoint is not consumed, only the work and nested
/// savepoints after it are). `release_savepoint` drops the target and
/// everything nested after it, matching `RELEASE SAVEPOINT`'s cascading
/// release.
///
/// `tx` is an `Option` so `commit`/`rollback` can move the underlying
/// `sqlx::Transaction` out of a type that also implements `Drop`. A context
/// dropped without an explicit `commit`/`rollback` falls through to
/// `sqlx::Transaction`'s own drop behavior (best-effort `ROLLBACK`, client
/// returned to the pool) and still emits `TransactionRolledBack` here.
pub struct TransactionContext {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    transaction_id: String,
    query_count: u32,
    start_time: Instant,
    completed: bool,
    savepoints: Vec<String>,
    events: Option<EventBus>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("transaction_id", &self.transaction_id)
            .field("query_count", &self.query_count)
            .field("savepoints", &self.savepoints)
            .finish_non_exhaustive()
    }
}

impl TransactionContext {
    pub async fn begin(pool: &sqlx::PgPool, isolation_level: IsolationLevel) -> Result<Self> {
        let options = TransactionOptions::new().isolation_level(isolation_level);
        Self::begin_with_options(pool, options).await
    }

    pub async fn begin_with_options(pool: &sqlx::PgPool, options: TransactionOptions) -> Result<Self> {
        let mut tx = pool.begin().await.map_err(Error::from)?;
        sqlx::query(&options.to_sql()).execute(&mut *tx).await.map_err(Error::from)?;
        let transaction_id = Uuid::new_v4().to_string();
        tracing::debug!(?options, transaction_id, "transaction began");
        Ok(Self {
            tx: Some(tx),
            transaction_id,
            query_count: 0,
            start_time: Instant::now(),
            completed: false,
            savepoints: Vec::new(),
            events: None,
        })
    }

    /// Attaches an event bus so `commit`/`rollback` emit lifecycle events.
    /// `RuVectorBridge::begin_transaction` calls this before handing the
    /// context back to the caller.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    fn tx_mut(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::TransactionStateError("transaction already completed".into()))
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::TransactionStateError("transaction already completed".into()))?;
        let result = tx.commit().await.map_err(Error::from);
        if result.is_ok() {
            self.completed = true;
            if let Some(events) = &self.events {
                events.emit(BridgeEvent::TransactionCommitted {
                    transaction_id: self.transaction_id.clone(),
                    query_count: self.query_count,
                    duration_ms: self.start_time.elapsed().as_millis() as u64,
                });
            }
        }
        result
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::TransactionStateError("transaction already completed".into()))?;
        let result = tx.rollback().await.map_err(Error::from);
        self.completed = true;
        if result.is_ok() {
            if let Some(events) = &self.events {
                events.emit(BridgeEvent::TransactionRolledBack {
                    transaction_id: self.transaction_id.clone(),
                    query_count: self.query_count,
                    duration_ms: self.start_time.elapsed().as_millis() as u64,
                });
            }
        }
        result
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        sql::validate_identifier(name)?;
        if self.savepoints.iter().any(|s| s == name) {
            return Err(Error::TransactionStateError(format!(
                "savepoint '{name}' is already open"
            )));
        }
        let tx = self.tx_mut()?;
        sqlx::query(&format!("SAVEPOINT {name}")).execute(&mut **tx).await.map_err(Error::from)?;
        self.savepoints.push(name.to_string());
        if let Some(events) = &self.events {
            events.emit(BridgeEvent::TransactionSavepoint {
                transaction_id: self.transaction_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        sql::validate_identifier(name)?;
        let position = self
            .savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::TransactionStateError(format!("no open savepoint named '{name}'")))?;

        let tx = self.tx_mut()?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .execute(&mut **tx)
            .await
            .map_err(Error::from)?;

        self.savepoints.truncate(position + 1);
        if let Some(events) = &self.events {
            events.emit(BridgeEvent::TransactionRollbackToSavepoint {
                transaction_id: self.transaction_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        sql::validate_identifier(name)?;
        let position = self
            .savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| Error::TransactionStateError(format!("no open savepoint named '{name}'")))?;

        let tx = self.tx_mut()?;
        sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
            .execute(&mut **tx)
            .await
            .map_err(Error::from)?;

        self.savepoints.truncate(position);
        if let Some(events) = &self.events {
            events.emit(BridgeEvent::TransactionReleaseSavepoint {
                transaction_id: self.transaction_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Runs a raw, already-built query against the transaction. Scoped
    /// operations (`search`/`insert`/`update`/`delete`) go through this.
    async fn execute_built(&mut self, built: &BuiltQuery) -> Result<Vec<sqlx::postgres::PgRow>> {
        let arguments = sql::bind_all(&built.params)?;
        let tx = self.tx_mut()?;
        let rows = sqlx::query_with(&built.sql, arguments)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::from)?;
        self.query_count += 1;
        Ok(rows)
    }

    pub async fn search(
        &mut self,
        options: &SearchOptions,
        query_vector: &Vector,
    ) -> Result<Vec<sqlx::postgres::PgRow>> {
        let built = sql::build_search_sql(options, query_vector)?;
        self.execute_built(&built).await
    }

    pub async fn insert(&mut self, options: &InsertOptions, rows: &[InsertRow]) -> Result<Vec<sqlx::postgres::PgRow>> {
        let built = sql::build_insert_sql(options, rows)?;
        self.execute_built(&built).await
    }

    pub async fn update(
        &mut self,
        options: &InsertOptions,
        id: ParamValue,
        vector: Option<&Vector>,
        metadata: Option<serde_json::Value>,
        merge_metadata: bool,
    ) -> Result<Vec<sqlx::postgres::PgRow>> {
        let built = sql::build_update_sql(options, id, vector, metadata, merge_metadata)?;
        self.execute_built(&built).await
    }

    pub async fn delete(&mut self, table: &str, id_column: &str, id: ParamValue) -> Result<u64> {
        let built = sql::build_delete_sql(table, id_column, id)?;
        let arguments = sql::bind_all(&built.params)?;
        let tx = self.tx_mut()?;
        let result = sqlx::query_with(&built.sql, arguments)
            .execute(&mut **tx)
            .await
            .map_err(Error::from)?;
        self.query_count += 1;
        Ok(result.rows_affected())
    }

    /// Runs a caller-provided statement without any of the builder's
    /// validation, for operations the typed surface doesn't cover.
    pub async fn query(&mut self, sql_text: &str, params: &[ParamValue]) -> Result<Vec<sqlx::postgres::PgRow>> {
        let arguments = sql::bind_all(params)?;
        let tx = self.tx_mut()?;
        let rows = sqlx::query_with(sql_text, arguments)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::from)?;
        self.query_count += 1;
        Ok(rows)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.completed && self.tx.is_some() {
            if let Some(events) = &self.events {
                events.emit(BridgeEvent::TransactionRolledBack {
                    transaction_id: self.transaction_id.clone(),
                    query_count: self.query_count,
                    duration_ms: self.start_time.elapsed().as_millis() as u64,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.to_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
    }

    #[test]
    fn transaction_options_default_sql() {
        let options = TransactionOptions::default();
        assert_eq!(options.to_sql(), "SET TRANSACTION ISOLATION LEVEL READ COMMITTED, READ WRITE");
    }

    #[test]
    fn deferrable_only_applies_to_serializable_read_only() {
        let options = TransactionOptions::new().isolation_level(IsolationLevel::Serializable).read_only().deferrable(true);
        assert_eq!(options.to_sql(), "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY, DEFERRABLE");

        let ignored = TransactionOptions::new().isolation_level(IsolationLevel::Serializable).read_write().deferrable(true);
        assert_eq!(ignored.to_sql(), "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ WRITE");
    }

    #[test]
    fn savepoint_stack_bookkeeping_matches_postgres_semantics() {
        // rollback_to keeps the target savepoint, drops everything nested after it
        let mut stack = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let position = stack.iter().position(|s| s == "b").unwrap();
        stack.truncate(position + 1);
        assert_eq!(stack, vec!["a".to_string(), "b".to_string()]);

        // release drops the target and everything nested after it
        let mut stack2 = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let position2 = stack2.iter().position(|s| s == "b").unwrap();
        stack2.truncate(position2);
        assert_eq!(stack2, vec!["a".to_string()]);
    }
}
