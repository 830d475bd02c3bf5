//! SQL composition for pgvector index DDL.

use ruvector_common::{Error, Result};

use super::identifier::{quote_identifier, validate_identifier};
use super::search::BuiltQuery;
use crate::vector::{DistanceMetric, IndexType};

/// Parameters for a pgvector index build.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub index_name: String,
    pub table: String,
    pub vector_column: String,
    pub index_type: IndexType,
    pub metric: DistanceMetric,
    /// HNSW `m` parameter (graph degree). Also used for `diskann`'s hnsw
    /// fallback. Ignored for ivfflat/ivfpq.
    pub hnsw_m: Option<u32>,
    /// HNSW `ef_construction` parameter. Also used for `diskann`'s hnsw
    /// fallback. Ignored for ivfflat/ivfpq.
    pub hnsw_ef_construction: Option<u32>,
    /// ivfflat `lists` parameter. Also used for `ivfpq`'s ivfflat fallback.
    /// Ignored for hnsw/diskann.
    pub ivfflat_lists: Option<u32>,
    pub concurrently: bool,
    /// Drop an existing index of the same name before creating this one.
    pub replace: bool,
}

impl IndexOptions {
    pub fn new(
        index_name: impl Into<String>,
        table: impl Into<String>,
        index_type: IndexType,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            table: table.into(),
            vector_column: "embedding".into(),
            index_type,
            metric,
            hnsw_m: None,
            hnsw_ef_construction: None,
            ivfflat_lists: None,
            concurrently: false,
            replace: false,
        }
    }
}

/// Builds `CREATE INDEX [CONCURRENTLY] name ON table USING method (column
/// operator_class) [WITH (...)]`, optionally prefixed with a `DROP INDEX IF
/// EXISTS` statement when `replace` is set.
///
/// `flat` means brute-force scan: no index backs it, so this returns `None`
/// rather than emitting a no-op statement.
pub fn build_create_index_sql(opts: &IndexOptions) -> Result<Option<String>> {
    if opts.index_type.is_no_op() {
        return Ok(None);
    }

    validate_identifier(&opts.index_name)?;
    validate_identifier(&opts.table)?;
    validate_identifier(&opts.vector_column)?;

    let mut with_parts = Vec::new();
    match opts.index_type {
        IndexType::Hnsw | IndexType::DiskAnn => {
            if let Some(m) = opts.hnsw_m {
                with_parts.push(format!("m = {m}"));
            }
            if let Some(ef) = opts.hnsw_ef_construction {
                with_parts.push(format!("ef_construction = {ef}"));
            }
        }
        IndexType::IvfFlat | IndexType::IvfPq => {
            if let Some(lists) = opts.ivfflat_lists {
                with_parts.push(format!("lists = {lists}"));
            }
        }
        IndexType::Flat => unreachable!("handled by is_no_op above"),
    }

    let mut create_sql = String::from("CREATE INDEX ");
    if opts.concurrently {
        create_sql.push_str("CONCURRENTLY ");
    }
    create_sql.push_str(&format!(
        "{} ON {} USING {} ({} {})",
        quote_identifier(&opts.index_name),
        quote_identifier(&opts.table),
        opts.index_type.access_method(),
        quote_identifier(&opts.vector_column),
        opts.metric.operator_class(),
    ));

    if !with_parts.is_empty() {
        create_sql.push_str(&format!(" WITH ({})", with_parts.join(", ")));
    }

    if opts.replace {
        let drop_sql = build_drop_index_sql(&opts.index_name, false, true)?;
        return Ok(Some(format!("{drop_sql}; {create_sql}")));
    }

    Ok(Some(create_sql))
}

/// Builds `DROP INDEX [CONCURRENTLY] [IF EXISTS] name`.
pub fn build_drop_index_sql(index_name: &str, concurrently: bool, if_exists: bool) -> Result<String> {
    validate_identifier(index_name)?;
    let mut sql = String::from("DROP INDEX ");
    if concurrently {
        sql.push_str("CONCURRENTLY ");
    }
    if if_exists {
        sql.push_str("IF EXISTS ");
    }
    sql.push_str(&quote_identifier(index_name));
    Ok(sql)
}

/// Builds `REINDEX INDEX [CONCURRENTLY] name` for rebuilding an index in place.
pub fn build_rebuild_index_sql(index_name: &str, concurrently: bool) -> Result<String> {
    validate_identifier(index_name)?;
    let mut sql = String::from("REINDEX INDEX ");
    if concurrently {
        sql.push_str("CONCURRENTLY ");
    }
    sql.push_str(&quote_identifier(index_name));
    Ok(sql)
}

/// Builds the catalog query used by `index_stats`: type, size, row count,
/// build-time estimate, and configured parameters for one index, joining
/// `pg_index`/`pg_am` with `pg_stat_user_indexes`.
pub fn build_index_stats_sql(index_name: &str) -> Result<BuiltQuery> {
    validate_identifier(index_name)?;
    Ok(BuiltQuery {
        sql: "SELECT i.relname AS index_name, am.amname AS index_type, \
              pg_relation_size(i.oid) AS size_bytes, \
              COALESCE(s.idx_scan, 0) AS scans, \
              (SELECT reltuples::bigint FROM pg_class WHERE oid = idx.indrelid) AS num_vectors \
              FROM pg_class i \
              JOIN pg_index idx ON idx.indexrelid = i.oid \
              JOIN pg_am am ON am.oid = i.relam \
              LEFT JOIN pg_stat_user_indexes s ON s.indexrelid = i.oid \
              WHERE i.relname = $1"
            .to_string(),
        params: vec![super::value::ParamValue::from(index_name)],
        session_params: Vec::new(),
    })
}

/// Builds the catalog query used by `list_indices`: every pgvector index,
/// optionally restricted to one table when `table` is `Some`.
pub fn build_list_indices_sql(table: Option<&str>) -> Result<BuiltQuery> {
    let mut sql = "SELECT i.relname AS index_name, t.relname AS table_name, \
                    am.amname AS access_method \
                    FROM pg_class t \
                    JOIN pg_index idx ON idx.indrelid = t.oid \
                    JOIN pg_class i ON i.oid = idx.indexrelid \
                    JOIN pg_am am ON am.oid = i.relam"
        .to_string();

    let mut params = Vec::new();
    if let Some(table) = table {
        validate_identifier(table)?;
        sql.push_str(" WHERE t.relname = $1");
        params.push(super::value::ParamValue::from(table));
    }

    Ok(BuiltQuery { sql, params, session_params: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_index_name_rejected() {
        assert!(build_drop_index_sql("", false, true).is_err());
    }

    #[test]
    fn builds_hnsw_create_index() {
        let mut opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::Hnsw, DistanceMetric::Cosine);
        opts.hnsw_m = Some(16);
        opts.hnsw_ef_construction = Some(64);
        let sql = build_create_index_sql(&opts).unwrap().unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX \"idx_docs_embedding\" ON \"documents\" USING hnsw (\"embedding\" vector_cosine_ops) WITH (m = 16, ef_construction = 64)"
        );
    }

    #[test]
    fn builds_ivfflat_create_index_concurrently() {
        let mut opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::IvfFlat, DistanceMetric::Euclidean);
        opts.ivfflat_lists = Some(100);
        opts.concurrently = true;
        let sql = build_create_index_sql(&opts).unwrap().unwrap();
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY \"idx_docs_embedding\" ON \"documents\" USING ivfflat (\"embedding\" vector_l2_ops) WITH (lists = 100)"
        );
    }

    #[test]
    fn ivfpq_rides_ivfflat_syntax() {
        let mut opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::IvfPq, DistanceMetric::Cosine);
        opts.ivfflat_lists = Some(50);
        let sql = build_create_index_sql(&opts).unwrap().unwrap();
        assert!(sql.contains("USING ivfflat"));
        assert!(sql.contains("lists = 50"));
    }

    #[test]
    fn diskann_rides_hnsw_syntax() {
        let opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::DiskAnn, DistanceMetric::Cosine);
        let sql = build_create_index_sql(&opts).unwrap().unwrap();
        assert!(sql.contains("USING hnsw"));
    }

    #[test]
    fn flat_index_type_emits_no_ddl() {
        let opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::Flat, DistanceMetric::Cosine);
        assert!(build_create_index_sql(&opts).unwrap().is_none());
    }

    #[test]
    fn replace_prepends_drop_index() {
        let mut opts = IndexOptions::new("idx_docs_embedding", "documents", IndexType::Hnsw, DistanceMetric::Cosine);
        opts.replace = true;
        let sql = build_create_index_sql(&opts).unwrap().unwrap();
        assert!(sql.starts_with("DROP INDEX IF EXISTS \"idx_docs_embedding\"; CREATE INDEX"));
    }

    #[test]
    fn builds_drop_index_if_exists() {
        let sql = build_drop_index_sql("idx_docs_embedding", false, true).unwrap();
        assert_eq!(sql, "DROP INDEX IF EXISTS \"idx_docs_embedding\"");
    }

    #[test]
    fn builds_rebuild_index_concurrently() {
        let sql = build_rebuild_index_sql("idx_docs_embedding", true).unwrap();
        assert_eq!(sql, "REINDEX INDEX CONCURRENTLY \"idx_docs_embedding\"");
    }

    #[test]
    fn list_indices_omits_where_clause_without_table() {
        let built = build_list_indices_sql(None).unwrap();
        assert!(!built.sql.contains("WHERE"));
        assert!(built.params.is_empty());
    }

    #[test]
    fn list_indices_filters_by_table_when_given() {
        let built = build_list_indices_sql(Some("documents")).unwrap();
        assert!(built.sql.contains("WHERE t.relname = $1"));
        assert_eq!(built.params.len(), 1);
    }
}
