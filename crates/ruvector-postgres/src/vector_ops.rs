//! Vector CRUD, index management, and batched search.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ruvector_common::{Error, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::Row;
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::events::BridgeEvent;
use crate::sql::{self, IndexOptions, InsertOptions, InsertRow, ParamValue, SearchOptions, VECTOR_TEXT_ALIAS};
use crate::vector::{DistanceMetric, Vector};

/// One row returned from a similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub distance: f64,
    pub score: f64,
    /// 1-based position within this result's own returned order.
    pub rank: u32,
    pub retrieved_at: DateTime<Utc>,
    pub vector: Option<Vector>,
    pub metadata: Option<JsonValue>,
}

/// One failed item within a batch insert, with enough context to retry or
/// report it without re-running the whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
    pub offending_item: Option<JsonValue>,
}

/// Outcome of a batch insert or bulk delete.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Ids returned by the database, in insertion order, when the
    /// underlying statement requested `RETURNING`.
    pub results: Vec<i64>,
    pub errors: Vec<BatchError>,
    pub duration_ms: u64,
    pub throughput: f64,
}

impl BatchResult {
    pub(crate) fn from_parts(total: usize, results: Vec<i64>, errors: Vec<BatchError>, duration_ms: u64) -> Self {
        let successful = results.len();
        let failed = total - successful;
        let throughput = if duration_ms == 0 {
            successful as f64
        } else {
            successful as f64 / (duration_ms as f64 / 1000.0)
        };
        Self { total, successful, failed, results, errors, duration_ms, throughput }
    }
}

/// Aggregate statistics across every vector-typed table in the database,
/// merged with this bridge's in-process metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub table_count: i64,
    pub total_rows: i64,
    pub total_size_bytes: i64,
    pub index_count: i64,
    pub metrics: crate::metrics::MetricsSnapshot,
}

/// Row/size statistics for a single vector table.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub row_count: i64,
    pub table_size_bytes: i64,
}

/// Metadata and counters for a single pgvector index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub index_name: String,
    pub index_type: String,
    pub size_bytes: i64,
    pub scans: i64,
    pub num_vectors: i64,
}

/// A named index, as reported by `list_indices`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub index_name: String,
    pub table_name: String,
    pub access_method: String,
}

/// Result of a single query within `batch_search`.
pub type BatchSearchItem = Result<Vec<SearchResult>>;

/// Cache accounting for `batch_search`. No cache is implemented yet, so
/// every call reports a pure miss — the field exists so a future cache can
/// fill it in without changing the return shape.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Outcome of `batch_search`: per-query results in input order, plus timing
/// and cache accounting across the whole window.
pub struct BatchSearchOutcome {
    pub results: Vec<BatchSearchItem>,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub cache_stats: CacheStats,
}

/// Shared by `VectorOperations::search` and the cursor/pagination-based
/// streaming engine, which both fetch `id`/`distance`[/`vector`][/`metadata`]
/// rows built from the same `SearchOptions`.
pub(crate) fn row_to_search_result(
    row: &sqlx::postgres::PgRow,
    options: &SearchOptions,
    rank: u32,
) -> Result<SearchResult> {
    let id: i64 = row.try_get(options.id_column.as_str()).map_err(Error::from)?;
    let distance: f64 = row.try_get("distance").map_err(Error::from)?;
    let metadata: Option<JsonValue> = row.try_get("metadata").unwrap_or(None);
    let vector = if options.include_vector {
        let text: String = row.try_get(VECTOR_TEXT_ALIAS).map_err(Error::from)?;
        Some(Vector::from_literal(&text)?)
    } else {
        None
    };
    Ok(SearchResult {
        id,
        distance,
        score: options.metric.distance_to_score(distance),
        rank,
        retrieved_at: Utc::now(),
        vector,
        metadata,
    })
}

/// Inserts one row and returns its id, bypassing the multi-row `VALUES`
/// list entirely — the fallback path `insert_chunk_with_fallback` drops to
/// when a whole-chunk insert fails and `skip_invalid` is set.
async fn insert_one(connections: &ConnectionManager, options: &InsertOptions, row: &InsertRow) -> Result<i64> {
    let built = sql::build_insert_sql(options, std::slice::from_ref(row))?;
    let rows = connections.query(&built.sql, &built.params, None).await?;
    let inserted = rows
        .first()
        .ok_or_else(|| Error::SqlError { code: None, message: "insert returned no row".into() })?;
    inserted.try_get::<i64, _>(options.id_column.as_str()).map_err(Error::from)
}

/// Attempts a single multi-row insert for `chunk`; on failure with
/// `skip_invalid`, degrades to per-row inserts so one bad row doesn't sink
/// the whole chunk. `index_offset` lets the caller report `BatchError.index`
/// relative to the full input sequence rather than the chunk.
pub(crate) async fn insert_chunk_with_fallback(
    connections: &ConnectionManager,
    options: &InsertOptions,
    chunk: &[InsertRow],
    skip_invalid: bool,
    index_offset: usize,
) -> Result<(Vec<i64>, Vec<BatchError>)> {
    let built = sql::build_insert_sql(options, chunk)?;
    match connections.query(&built.sql, &built.params, None).await {
        Ok(rows) => {
            let ids = rows
                .iter()
                .map(|r| r.try_get::<i64, _>(options.id_column.as_str()).map_err(Error::from))
                .collect::<Result<Vec<_>>>()?;
            Ok((ids, Vec::new()))
        }
        Err(e) if !skip_invalid => Err(e),
        Err(_) => {
            let mut ids = Vec::new();
            let mut errors = Vec::new();
            for (i, row) in chunk.iter().enumerate() {
                match insert_one(connections, options, row).await {
                    Ok(id) => ids.push(id),
                    Err(e) => errors.push(BatchError {
                        index: index_offset + i,
                        message: e.to_string(),
                        offending_item: row.metadata.clone(),
                    }),
                }
            }
            Ok((ids, errors))
        }
    }
}

/// Vector search, mutation, and index-management operations.
///
/// Every method goes through the connection manager's `query`, so every
/// one inherits its retry/backoff and timeout behavior — this is the
/// "no auto-retry inside a transaction" line that `TransactionContext`
/// draws, not a restriction here.
pub struct VectorOperations {
    connections: Arc<ConnectionManager>,
}

impl VectorOperations {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub async fn search(&self, options: &SearchOptions, query_vector: &Vector) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let built = sql::build_search_sql(options, query_vector)?;
        for (name, value) in &built.session_params {
            let _ = self
                .connections
                .query(&format!("SET LOCAL {name} = {value}"), &[], None)
                .await;
        }
        let rows = self.connections.query(&built.sql, &built.params, None).await?;
        let results = rows
            .iter()
            .enumerate()
            .map(|(i, r)| row_to_search_result(r, options, (i + 1) as u32))
            .collect::<Result<Vec<_>>>()?;

        self.connections.metrics().record_search_performed();
        self.connections.events_emit(BridgeEvent::SearchCompleted {
            search_id: Uuid::new_v4().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            result_count: results.len(),
            scanned_count: results.len(),
            cache_hit: false,
        });

        Ok(results)
    }

    /// Runs several independent searches concurrently, bounded by
    /// `concurrency`. Each query's own filter/`where` clause is honored —
    /// unlike a naive implementation that only vectorizes the distance
    /// computation and silently drops per-query filters, every
    /// `SearchOptions` here is built and executed in full.
    pub async fn batch_search(
        &self,
        queries: Vec<(SearchOptions, Vector)>,
        concurrency: usize,
    ) -> BatchSearchOutcome {
        let concurrency = concurrency.max(1);
        let count = queries.len();
        let started = Instant::now();

        let results: Vec<BatchSearchItem> = stream::iter(queries)
            .map(|(options, vector)| async move { self.search(&options, &vector).await })
            .buffered(concurrency)
            .collect()
            .await;

        let total_duration_ms = started.elapsed().as_millis() as u64;
        let avg_duration_ms = if count == 0 { 0.0 } else { total_duration_ms as f64 / count as f64 };

        BatchSearchOutcome {
            results,
            total_duration_ms,
            avg_duration_ms,
            cache_stats: CacheStats { hits: 0, misses: count as u64, hit_rate: 0.0 },
        }
    }

    /// Inserts `rows` as a single batch. For more than a handful of rows,
    /// prefer `insert_batched`, which chunks the input and can fall back to
    /// per-row inserts on partial failure.
    pub async fn insert(&self, options: &InsertOptions, rows: Vec<InsertRow>, skip_invalid: bool) -> Result<BatchResult> {
        let batch_size = rows.len().max(1);
        self.insert_batched(options, rows, batch_size, skip_invalid).await
    }

    /// Inserts rows in fixed-size batches, optionally continuing past rows
    /// that fail validation instead of aborting the whole call.
    pub async fn insert_batched(
        &self,
        options: &InsertOptions,
        rows: Vec<InsertRow>,
        batch_size: usize,
        skip_invalid: bool,
    ) -> Result<BatchResult> {
        let batch_size = batch_size.max(1);
        let total = rows.len();
        let started = Instant::now();

        let mut all_ids = Vec::new();
        let mut all_errors = Vec::new();

        for (chunk_index, chunk) in rows.chunks(batch_size).enumerate() {
            let offset = chunk_index * batch_size;
            let (ids, errors) =
                insert_chunk_with_fallback(&self.connections, options, chunk, skip_invalid, offset).await?;
            all_ids.extend(ids);
            all_errors.extend(errors);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = BatchResult::from_parts(total, all_ids, all_errors, duration_ms);

        self.connections.metrics().record_vectors_inserted(result.successful as u64);
        self.connections.events_emit(BridgeEvent::VectorBatchComplete {
            table: options.table.clone(),
            count: total,
            duration_ms,
            success_count: result.successful,
            failed_count: result.failed,
        });

        Ok(result)
    }

    pub async fn update(
        &self,
        options: &InsertOptions,
        id: ParamValue,
        vector: Option<&Vector>,
        metadata: Option<JsonValue>,
        merge_metadata: bool,
    ) -> Result<bool> {
        let built = sql::build_update_sql(options, id.clone(), vector, metadata, merge_metadata)?;
        let rows = self.connections.query(&built.sql, &built.params, None).await?;
        let matched = !rows.is_empty();
        if matched {
            self.connections.metrics().record_vectors_updated(1);
            self.connections.events_emit(BridgeEvent::VectorUpdated {
                id: serde_json::to_value(&id).unwrap_or(JsonValue::Null),
            });
        }
        Ok(matched)
    }

    pub async fn delete(&self, table: &str, id_column: &str, id: ParamValue) -> Result<bool> {
        let built = sql::build_delete_sql(table, id_column, id)?;
        let rows_affected = self.connections.execute(&built.sql, &built.params, None).await?;
        if rows_affected > 0 {
            self.connections.metrics().record_vectors_deleted(rows_affected);
        }
        Ok(rows_affected > 0)
    }

    pub async fn bulk_delete(&self, table: &str, id_column: &str, ids: Vec<i64>) -> Result<BatchResult> {
        let total = ids.len();
        let started = Instant::now();
        let built = sql::build_bulk_delete_sql(table, id_column, ids)?;
        let rows_affected = self.connections.execute(&built.sql, &built.params, None).await?;
        let successful = rows_affected as usize;
        self.connections.metrics().record_vectors_deleted(rows_affected);

        Ok(BatchResult {
            total,
            successful,
            failed: total.saturating_sub(successful),
            results: Vec::new(),
            errors: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            throughput: 0.0,
        })
    }

    /// Creates an index, or does nothing for `IndexType::Flat` (brute
    /// force, no DDL). When `replace` is set, `build_create_index_sql`
    /// returns a combined `DROP INDEX; CREATE INDEX` string; sqlx's
    /// extended protocol won't run two statements in one call, so each is
    /// split out and executed separately.
    pub async fn create_index(&self, options: &IndexOptions) -> Result<()> {
        let Some(sql_text) = sql::build_create_index_sql(options)? else {
            return Ok(());
        };

        for statement in sql_text.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                self.connections.query(statement, &[], None).await?;
            }
        }

        self.connections.events_emit(BridgeEvent::IndexCreated {
            index_name: options.index_name.clone(),
            table: options.table.clone(),
            column: options.vector_column.clone(),
            index_type: options.index_type.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn drop_index(&self, options: &IndexOptions, concurrently: bool, if_exists: bool) -> Result<()> {
        let sql_text = sql::build_drop_index_sql(&options.index_name, concurrently, if_exists)?;
        self.connections.query(&sql_text, &[], None).await?;
        self.connections.events_emit(BridgeEvent::IndexDropped {
            index_name: options.index_name.clone(),
            table: options.table.clone(),
            column: options.vector_column.clone(),
            index_type: options.index_type.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn rebuild_index(&self, options: &IndexOptions, concurrently: bool) -> Result<()> {
        let sql_text = sql::build_rebuild_index_sql(&options.index_name, concurrently)?;
        self.connections.query(&sql_text, &[], None).await?;
        self.connections.events_emit(BridgeEvent::IndexRebuilt {
            index_name: options.index_name.clone(),
            table: options.table.clone(),
            column: options.vector_column.clone(),
            index_type: options.index_type.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn index_stats(&self, index_name: &str) -> Result<IndexStats> {
        let built = sql::build_index_stats_sql(index_name)?;
        let rows = self.connections.query(&built.sql, &built.params, None).await?;
        let row = rows
            .first()
            .ok_or_else(|| Error::SqlError { code: None, message: format!("index '{index_name}' not found") })?;
        Ok(IndexStats {
            index_name: row.try_get("index_name").map_err(Error::from)?,
            index_type: row.try_get("index_type").map_err(Error::from)?,
            size_bytes: row.try_get("size_bytes").map_err(Error::from)?,
            scans: row.try_get("scans").map_err(Error::from)?,
            num_vectors: row.try_get("num_vectors").map_err(Error::from)?,
        })
    }

    pub async fn list_indices(&self, table: Option<&str>) -> Result<Vec<IndexSummary>> {
        let built = sql::build_list_indices_sql(table)?;
        let rows = self.connections.query(&built.sql, &built.params, None).await?;
        rows.iter()
            .map(|row| {
                Ok(IndexSummary {
                    index_name: row.try_get("index_name").map_err(Error::from)?,
                    table_name: row.try_get("table_name").map_err(Error::from)?,
                    access_method: row.try_get("access_method").map_err(Error::from)?,
                })
            })
            .collect()
    }

    /// Row/size statistics for one table, independent of any one index.
    pub async fn get_table_stats(&self, table: &str) -> Result<TableStats> {
        sql::validate_identifier(table)?;
        let quoted = sql::quote_identifier(table);
        let sql_text = format!(
            "SELECT (SELECT count(*) FROM {quoted}) AS row_count, pg_total_relation_size({quoted}::regclass) AS table_size_bytes"
        );
        let rows = self.connections.query(&sql_text, &[], None).await?;
        let row = rows.first().ok_or_else(|| Error::SqlError {
            code: None,
            message: "stats query returned no rows".into(),
        })?;
        Ok(TableStats {
            row_count: row.try_get("row_count").map_err(Error::from)?,
            table_size_bytes: row.try_get("table_size_bytes").map_err(Error::from)?,
        })
    }

    /// Aggregates across every vector-typed table in the database (every
    /// table with a column of type `vector`), merged with this bridge's
    /// in-process metrics.
    pub async fn get_stats(&self) -> Result<BridgeStats> {
        let table_rows = self
            .connections
            .query(
                "SELECT count(DISTINCT c.oid) AS table_count, \
                 COALESCE(sum(c.reltuples)::bigint, 0) AS total_rows, \
                 COALESCE(sum(pg_total_relation_size(c.oid)), 0) AS total_size_bytes \
                 FROM pg_attribute a \
                 JOIN pg_class c ON c.oid = a.attrelid \
                 WHERE a.atttypid = 'vector'::regtype AND c.relkind = 'r'",
                &[],
                None,
            )
            .await?;
        let table_row = table_rows.first().ok_or_else(|| Error::SqlError {
            code: None,
            message: "stats query returned no rows".into(),
        })?;

        let index_rows = self
            .connections
            .query(
                "SELECT count(DISTINCT i.indexrelid) AS index_count \
                 FROM pg_index i \
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
                 WHERE a.atttypid = 'vector'::regtype",
                &[],
                None,
            )
            .await?;
        let index_count: i64 = index_rows
            .first()
            .map(|r| r.try_get("index_count"))
            .transpose()
            .map_err(Error::from)?
            .unwrap_or(0);

        Ok(BridgeStats {
            table_count: table_row.try_get("table_count").map_err(Error::from)?,
            total_rows: table_row.try_get("total_rows").map_err(Error::from)?,
            total_size_bytes: table_row.try_get("total_size_bytes").map_err(Error::from)?,
            index_count,
            metrics: self.connections.metrics().snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_result_computes_throughput() {
        let result = BatchResult::from_parts(4, vec![1, 2, 3], Vec::new(), 2000);
        assert_eq!(result.total, 4);
        assert_eq!(result.successful, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(result.throughput, 1.5);
    }

    #[test]
    fn batch_result_zero_duration_reports_successful_as_throughput() {
        let result = BatchResult::from_parts(2, vec![1, 2], Vec::new(), 0);
        assert_eq!(result.throughput, 2.0);
    }

    #[test]
    fn batch_error_carries_offending_item() {
        let err = BatchError { index: 3, message: "bad".into(), offending_item: Some(serde_json::json!({"a": 1})) };
        assert_eq!(err.index, 3);
        assert!(err.offending_item.is_some());
    }
}
