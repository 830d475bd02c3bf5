//! Server-side cursor and pagination streaming for large result sets, and
//! batched inserts with real pause/resume backpressure.
//!
//! Grounded in the same shape as a hand-rolled driver's cursor helper:
//! `BEGIN` (implicit via `pool.begin()`), `DECLARE ... CURSOR WITH HOLD FOR`,
//! repeated `FETCH` until a short page signals exhaustion, then
//! unconditional `CLOSE`/`COMMIT` (or `ROLLBACK` on error) so the cursor and
//! the transaction holding it are never leaked on an error exit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ruvector_common::{Error, Result};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::events::BridgeEvent;
use crate::sql::{self, InsertOptions, InsertRow};
use crate::vector::Vector;
use crate::vector_ops::{insert_chunk_with_fallback, row_to_search_result, BatchResult, SearchResult};

/// Shared pause/abort signal for one in-flight stream. A caller holds the
/// `Arc` handed back alongside the stream and can call `pause`/`resume`/
/// `abort` from another task while `stream_search`/`stream_insert` is still
/// running; these are plain atomics, not part of error handling.
#[derive(Debug, Default)]
pub struct StreamControl {
    paused: AtomicBool,
    aborted: AtomicBool,
}

impl StreamControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Which SQL shape `stream_search` fetches with.
#[derive(Debug, Clone, Copy)]
pub enum StreamMode {
    /// `DECLARE ... CURSOR WITH HOLD FOR ...` plus repeated `FETCH`, inside
    /// one held transaction.
    Cursor,
    /// `LIMIT page_size OFFSET n`, re-issued as an independent query per
    /// page. No transaction or cursor to clean up.
    Paginated { page_size: u32 },
}

/// Options for a streaming search. `search.k` is ignored; the stream mode's
/// own page/batch size controls how many rows come back per round trip.
#[derive(Debug, Clone)]
pub struct StreamSearchOptions {
    pub search: sql::SearchOptions,
    pub batch_size: u32,
}

impl StreamSearchOptions {
    pub fn new(search: sql::SearchOptions, batch_size: u32) -> Self {
        Self { search, batch_size: batch_size.max(1) }
    }
}

/// Options for a backpressured streaming insert.
#[derive(Debug, Clone)]
pub struct StreamInsertOptions {
    pub insert: InsertOptions,
    pub batch_size: usize,
    pub skip_invalid: bool,
}

impl StreamInsertOptions {
    pub fn new(insert: InsertOptions, batch_size: usize) -> Self {
        Self { insert, batch_size: batch_size.max(1), skip_invalid: false }
    }
}

/// Cursor/pagination search streaming and batched insert streaming.
pub struct StreamingEngine {
    connections: Arc<ConnectionManager>,
    active_cursors: Mutex<HashSet<String>>,
}

impl StreamingEngine {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections, active_cursors: Mutex::new(HashSet::new()) }
    }

    /// Names of cursors this engine currently holds open. Must be empty
    /// whenever no `stream_search(StreamMode::Cursor, ..)` call is in
    /// flight — every exit path (`Ok`, `Err`, or abort) removes its cursor
    /// before returning.
    pub fn active_cursors(&self) -> Vec<String> {
        self.active_cursors.lock().expect("active_cursors mutex poisoned").iter().cloned().collect()
    }

    /// Blocks while `control` is paused, emitting exactly one `StreamPaused`
    /// on entry and one `StreamResumed` on exit from a paused span.
    async fn wait_while_paused(&self, control: &StreamControl) {
        if !control.is_paused() {
            return;
        }
        self.connections
            .events_emit(BridgeEvent::StreamPaused { reason: "caller requested pause".into() });
        while control.is_paused() && !control.is_aborted() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.connections.events_emit(BridgeEvent::StreamResumed);
    }

    /// Streams a similarity search, invoking `on_batch` once per fetched
    /// page, and returns the total row count. `rank` is monotonic across
    /// every batch the whole stream produces, not reset per page.
    pub async fn stream_search<F>(
        &self,
        options: &StreamSearchOptions,
        query_vector: &Vector,
        mode: StreamMode,
        control: Arc<StreamControl>,
        on_batch: F,
    ) -> Result<usize>
    where
        F: FnMut(Vec<SearchResult>) -> Result<()>,
    {
        let started = Instant::now();
        let total = match mode {
            StreamMode::Cursor => self.stream_search_cursor(options, query_vector, &control, on_batch).await,
            StreamMode::Paginated { page_size } => {
                self.stream_search_paginated(options, query_vector, page_size, &control, on_batch).await
            }
        };

        match &total {
            Ok(count) => {
                self.connections.events_emit(BridgeEvent::SearchCompleted {
                    search_id: Uuid::new_v4().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    result_count: *count,
                    scanned_count: *count,
                    cache_hit: false,
                });
            }
            Err(_) => {}
        }
        total
    }

    async fn stream_search_cursor<F>(
        &self,
        options: &StreamSearchOptions,
        query_vector: &Vector,
        control: &StreamControl,
        mut on_batch: F,
    ) -> Result<usize>
    where
        F: FnMut(Vec<SearchResult>) -> Result<()>,
    {
        let built = sql::build_stream_search_sql(&options.search, query_vector)?;
        let pool = self.connections.raw_pool()?;
        let mut tx = pool.begin().await.map_err(Error::from)?;

        let cursor_name = format!("ruvector_cursor_{}", Uuid::new_v4().simple());
        let declare_sql = format!("DECLARE {cursor_name} CURSOR WITH HOLD FOR {}", built.sql);
        let arguments = sql::bind_all(&built.params)?;

        self.active_cursors.lock().expect("active_cursors mutex poisoned").insert(cursor_name.clone());

        let result: Result<usize> = async {
            sqlx::query_with(&declare_sql, arguments)
                .execute(&mut *tx)
                .await
                .map_err(Error::from)?;

            let mut total = 0usize;
            let mut rank = 0u32;
            loop {
                if control.is_aborted() {
                    self.connections
                        .events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                    break;
                }
                self.wait_while_paused(control).await;
                if control.is_aborted() {
                    self.connections
                        .events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                    break;
                }

                let fetch_sql = format!("FETCH {} FROM {cursor_name}", options.batch_size);
                let rows = sqlx::query(&fetch_sql).fetch_all(&mut *tx).await.map_err(Error::from)?;
                let got = rows.len();
                let batch = rows
                    .iter()
                    .map(|r| {
                        rank += 1;
                        row_to_search_result(r, &options.search, rank)
                    })
                    .collect::<Result<Vec<_>>>()?;
                total += batch.len();
                on_batch(batch)?;
                if (got as u32) < options.batch_size {
                    break;
                }
            }
            Ok(total)
        }
        .await;

        // Always close the cursor before deciding commit vs. rollback, on
        // every exit path including an error from `on_batch` itself.
        let _ = sqlx::query(&format!("CLOSE {cursor_name}")).execute(&mut *tx).await;
        self.active_cursors.lock().expect("active_cursors mutex poisoned").remove(&cursor_name);

        match result {
            Ok(total) => {
                tx.commit().await.map_err(Error::from)?;
                Ok(total)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn stream_search_paginated<F>(
        &self,
        options: &StreamSearchOptions,
        query_vector: &Vector,
        page_size: u32,
        control: &StreamControl,
        mut on_batch: F,
    ) -> Result<usize>
    where
        F: FnMut(Vec<SearchResult>) -> Result<()>,
    {
        let mut total = 0usize;
        let mut rank = 0u32;
        let mut offset = 0u64;

        loop {
            if control.is_aborted() {
                self.connections.events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                break;
            }
            self.wait_while_paused(control).await;
            if control.is_aborted() {
                self.connections.events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                break;
            }

            let built = sql::build_paginated_search_sql(&options.search, query_vector, page_size, offset)?;
            let rows = self.connections.query(&built.sql, &built.params, None).await?;
            let got = rows.len();
            let batch = rows
                .iter()
                .map(|r| {
                    rank += 1;
                    row_to_search_result(r, &options.search, rank)
                })
                .collect::<Result<Vec<_>>>()?;
            total += batch.len();
            on_batch(batch)?;
            offset += page_size as u64;
            if (got as u32) < page_size {
                break;
            }
        }

        Ok(total)
    }

    /// Streams inserts from `rows` in fixed-size batches. Pause/resume is
    /// independent of per-batch failure handling: a paused stream simply
    /// waits before fetching its next chunk, while `skip_invalid` failures
    /// fall back to per-row inserts via the same helper `insert`/
    /// `insert_batched` use.
    pub async fn stream_insert(
        &self,
        options: &StreamInsertOptions,
        rows: Vec<InsertRow>,
        control: Arc<StreamControl>,
    ) -> Result<BatchResult> {
        let total = rows.len();
        let started = Instant::now();
        let mut all_ids = Vec::new();
        let mut all_errors = Vec::new();

        for (chunk_index, chunk) in rows.chunks(options.batch_size).enumerate() {
            if control.is_aborted() {
                self.connections.events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                break;
            }
            self.wait_while_paused(&control).await;
            if control.is_aborted() {
                self.connections.events_emit(BridgeEvent::StreamAborted { reason: "aborted by caller".into() });
                break;
            }

            let offset = chunk_index * options.batch_size;
            let (ids, errors) =
                insert_chunk_with_fallback(&self.connections, &options.insert, chunk, options.skip_invalid, offset)
                    .await?;
            all_ids.extend(ids);
            all_errors.extend(errors);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = BatchResult::from_parts(total, all_ids, all_errors, duration_ms);

        self.connections.metrics().record_vectors_inserted(result.successful as u64);
        self.connections.events_emit(BridgeEvent::VectorBatchComplete {
            table: options.insert.table.clone(),
            count: total,
            duration_ms,
            success_count: result.successful,
            failed_count: result.failed,
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::DistanceMetric;

    #[test]
    fn stream_search_options_floors_batch_size_at_one() {
        let search = sql::SearchOptions::new("documents", DistanceMetric::Cosine, 10);
        let opts = StreamSearchOptions::new(search, 0);
        assert_eq!(opts.batch_size, 1);
    }

    #[test]
    fn stream_insert_options_floors_batch_size_at_one() {
        let insert = InsertOptions::new("documents");
        let opts = StreamInsertOptions::new(insert, 0);
        assert_eq!(opts.batch_size, 1);
    }

    #[test]
    fn stream_control_starts_unpaused_and_not_aborted() {
        let control = StreamControl::new();
        assert!(!control.is_paused());
        assert!(!control.is_aborted());
    }

    #[test]
    fn stream_control_pause_resume_abort_toggle_flags() {
        let control = StreamControl::new();
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
        control.abort();
        assert!(control.is_aborted());
    }

    #[tokio::test]
    async fn new_engine_has_no_active_cursors() {
        let config = crate::config::ConnectionConfig::new("postgres://localhost/test");
        let connections = Arc::new(ConnectionManager::new(config, crate::events::EventBus::new(4)));
        let engine = StreamingEngine::new(connections);
        assert!(engine.active_cursors().is_empty());
    }
}
