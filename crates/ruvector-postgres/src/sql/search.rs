//! SQL composition for vector similarity search.

use std::collections::BTreeMap;
use std::time::Duration;

use ruvector_common::{Error, Result};

use super::identifier::{adjust_param_indices, quote_identifier, validate_identifier};
use super::value::ParamValue;
use crate::vector::{DistanceMetric, Vector};

/// The column alias used for the pgvector text cast of the embedding column
/// when a search asks for `include_vector`. Chosen so it can never collide
/// with a caller-supplied `select_columns` identifier, which is always
/// validated as a plain SQL identifier and so can't contain a colon.
pub const VECTOR_TEXT_ALIAS: &str = "ruvector_vector_text";

/// Options controlling a single similarity search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub table: String,
    pub vector_column: String,
    pub id_column: String,
    pub metadata_column: Option<String>,
    pub metric: DistanceMetric,
    pub k: u32,
    /// Additional columns to return alongside id/distance.
    pub select_columns: Vec<String>,
    pub include_vector: bool,
    pub include_metadata: bool,
    /// Equality/containment filters, applied in key order for deterministic
    /// SQL generation. The key `"metadata"` is special: its value is matched
    /// with JSONB containment (`@> $n::jsonb`) against `metadata_column`
    /// rather than column equality.
    pub filter: BTreeMap<String, ParamValue>,
    /// A raw SQL boolean expression (e.g. `"category = $1"`), placeholder
    /// indices starting at 1 and renumbered automatically to come after
    /// every other clause's parameters.
    pub custom_where: Option<String>,
    pub custom_where_params: Vec<ParamValue>,
    /// Minimum similarity score required (see `DistanceMetric::
    /// uses_similarity_threshold` for which clause form applies).
    pub threshold: Option<f64>,
    /// Reject results whose raw pgvector distance exceeds this value.
    pub max_distance: Option<f64>,
    pub timeout: Option<Duration>,
    /// `hnsw.ef_search` session parameter, issued via `SET LOCAL` before
    /// the query runs.
    pub ef_search: Option<u32>,
    /// `ivfflat.probes` session parameter, issued via `SET LOCAL` before
    /// the query runs.
    pub probes: Option<u32>,
}

impl SearchOptions {
    pub fn new(table: impl Into<String>, metric: DistanceMetric, k: u32) -> Self {
        Self {
            table: table.into(),
            vector_column: "embedding".into(),
            id_column: "id".into(),
            metadata_column: Some("metadata".into()),
            metric,
            k,
            select_columns: Vec::new(),
            include_vector: false,
            include_metadata: false,
            filter: BTreeMap::new(),
            custom_where: None,
            custom_where_params: Vec::new(),
            threshold: None,
            max_distance: None,
            timeout: None,
            ef_search: None,
            probes: None,
        }
    }
}

/// Result of building a search query: the SQL text, the parameter list to
/// bind in order, and any session GUCs (`hnsw.ef_search`, `ivfflat.probes`)
/// that must be set with `SET LOCAL` before the query runs.
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<ParamValue>,
    pub session_params: Vec<(&'static str, u32)>,
}

struct BaseQuery {
    sql: String,
    params: Vec<ParamValue>,
    session_params: Vec<(&'static str, u32)>,
}

/// Builds the shared `SELECT ... FROM ... [WHERE ...]` body used by every
/// search-shaped query (limited, cursor, and paginated). The trailing
/// `ORDER BY`/`LIMIT`/`OFFSET` is each caller's own responsibility, since
/// that's the only part that differs between them.
fn build_base_query(opts: &SearchOptions, query_vector: &Vector) -> Result<BaseQuery> {
    validate_identifier(&opts.table)?;
    validate_identifier(&opts.vector_column)?;
    validate_identifier(&opts.id_column)?;
    for col in &opts.select_columns {
        validate_identifier(col)?;
    }
    if opts.include_metadata || opts.filter.contains_key("metadata") {
        let col = opts
            .metadata_column
            .as_ref()
            .ok_or_else(|| Error::ValidationError("metadata_column is required".into()))?;
        validate_identifier(col)?;
    }

    let op = opts.metric.operator();
    let vector_literal = query_vector.to_literal();
    // Postgres can't reference a SELECT-list alias from its own WHERE
    // clause, so this raw expression is reused verbatim everywhere the
    // distance value is needed instead of an alias lookup.
    let distance_expr = format!(
        "{} {} '{}'::vector",
        quote_identifier(&opts.vector_column),
        op,
        vector_literal
    );

    let mut select_list = vec![quote_identifier(&opts.id_column), format!("{distance_expr} AS distance")];
    if opts.include_vector {
        select_list.push(format!(
            "{}::text AS {VECTOR_TEXT_ALIAS}",
            quote_identifier(&opts.vector_column)
        ));
    }
    if opts.include_metadata {
        let col = opts.metadata_column.as_ref().expect("validated above");
        select_list.push(format!("{} AS metadata", quote_identifier(col)));
    }
    for col in &opts.select_columns {
        select_list.push(quote_identifier(col));
    }

    let mut params: Vec<ParamValue> = Vec::new();
    let mut where_parts: Vec<String> = Vec::new();

    if let Some(threshold) = opts.threshold {
        let idx = params.len() + 1;
        if opts.metric.uses_linear_score() {
            where_parts.push(format!("(1 - ({distance_expr})) >= ${idx}"));
        } else {
            where_parts.push(format!("({distance_expr}) <= ${idx}"));
        }
        params.push(ParamValue::Double(threshold));
    }

    if let Some(max_distance) = opts.max_distance {
        let idx = params.len() + 1;
        where_parts.push(format!("({distance_expr}) <= ${idx}"));
        params.push(ParamValue::Double(max_distance));
    }

    for (key, value) in &opts.filter {
        let idx = params.len() + 1;
        if key == "metadata" {
            let col = opts.metadata_column.as_ref().expect("validated above");
            where_parts.push(format!("{} @> ${idx}::jsonb", quote_identifier(col)));
        } else {
            validate_identifier(key)?;
            where_parts.push(format!("{} = ${idx}", quote_identifier(key)));
        }
        params.push(value.clone());
    }

    if let Some(custom_where) = &opts.custom_where {
        let adjusted = adjust_param_indices(custom_where, params.len());
        where_parts.push(format!("({adjusted})"));
        params.extend(opts.custom_where_params.clone());
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list.join(", "),
        quote_identifier(&opts.table)
    );
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }

    let mut session_params = Vec::new();
    if let Some(ef_search) = opts.ef_search {
        session_params.push(("hnsw.ef_search", ef_search));
    }
    if let Some(probes) = opts.probes {
        session_params.push(("ivfflat.probes", probes));
    }

    Ok(BaseQuery { sql, params, session_params })
}

/// Builds `SELECT ... FROM ... [WHERE ...] ORDER BY distance LIMIT k`.
///
/// The query vector is inlined as a pgvector literal (pgvector cannot bind
/// a vector through a driver parameter); every other value, including
/// filter parameters, is placeholder-bound.
pub fn build_search_sql(opts: &SearchOptions, query_vector: &Vector) -> Result<BuiltQuery> {
    if opts.k == 0 {
        return Err(Error::ValidationError("k must be greater than zero".into()));
    }
    let mut base = build_base_query(opts, query_vector)?;
    base.sql.push_str(&format!(" ORDER BY distance ASC LIMIT {}", opts.k));
    Ok(BuiltQuery { sql: base.sql, params: base.params, session_params: base.session_params })
}

/// Builds the same `SELECT ... WHERE ... ORDER BY distance` query as
/// `build_search_sql` but without a `LIMIT`, for use as the body of a
/// server-side cursor that the caller fetches in batches.
pub fn build_stream_search_sql(opts: &SearchOptions, query_vector: &Vector) -> Result<BuiltQuery> {
    let mut base = build_base_query(opts, query_vector)?;
    base.sql.push_str(" ORDER BY distance ASC");
    Ok(BuiltQuery { sql: base.sql, params: base.params, session_params: base.session_params })
}

/// Builds the same query as `build_stream_search_sql` but with `LIMIT
/// page_size OFFSET offset`, for pagination-mode streaming (no open
/// transaction/cursor needed between pages).
pub fn build_paginated_search_sql(
    opts: &SearchOptions,
    query_vector: &Vector,
    page_size: u32,
    offset: u64,
) -> Result<BuiltQuery> {
    if page_size == 0 {
        return Err(Error::ValidationError("page_size must be greater than zero".into()));
    }
    let mut base = build_base_query(opts, query_vector)?;
    base.sql.push_str(&format!(" ORDER BY distance ASC LIMIT {page_size} OFFSET {offset}"));
    Ok(BuiltQuery { sql: base.sql, params: base.params, session_params: base.session_params })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3() -> Vector {
        Vector::new(vec![1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn builds_basic_search_query() {
        let opts = SearchOptions::new("documents", DistanceMetric::Cosine, 10);
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("\"embedding\" <=> '[1,2,3]'::vector AS distance"));
        assert!(built.sql.contains("ORDER BY distance ASC LIMIT 10"));
        assert!(built.params.is_empty());
    }

    #[test]
    fn builds_search_with_filter_and_distance_bound() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Euclidean, 5);
        opts.filter.insert("category".into(), ParamValue::from("news"));
        opts.max_distance = Some(0.5);
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("<= $1"));
        assert!(built.sql.contains("\"category\" = $2"));
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn metadata_filter_key_uses_jsonb_containment() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Cosine, 5);
        opts.filter.insert(
            "metadata".into(),
            ParamValue::Json(serde_json::json!({"label": "a"})),
        );
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("\"metadata\" @> $1::jsonb"));
    }

    #[test]
    fn threshold_uses_linear_form_for_cosine() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Cosine, 5);
        opts.threshold = Some(0.8);
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("(1 - (\"embedding\" <=> '[1,2,3]'::vector)) >= $1"));
    }

    #[test]
    fn threshold_uses_distance_form_for_euclidean() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Euclidean, 5);
        opts.threshold = Some(0.8);
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("(\"embedding\" <-> '[1,2,3]'::vector) <= $1"));
    }

    #[test]
    fn custom_where_is_renumbered_after_filter_params() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Cosine, 5);
        opts.filter.insert("category".into(), ParamValue::from("news"));
        opts.custom_where = Some("published_at > $1".into());
        opts.custom_where_params = vec![ParamValue::from("2024-01-01")];
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains("(published_at > $2)"));
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn ef_search_and_probes_become_session_params() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Cosine, 5);
        opts.ef_search = Some(80);
        opts.probes = Some(10);
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert_eq!(built.session_params, vec![("hnsw.ef_search", 80), ("ivfflat.probes", 10)]);
    }

    #[test]
    fn include_vector_adds_text_cast_column() {
        let mut opts = SearchOptions::new("documents", DistanceMetric::Cosine, 5);
        opts.include_vector = true;
        let built = build_search_sql(&opts, &vec3()).unwrap();
        assert!(built.sql.contains(&format!("::text AS {VECTOR_TEXT_ALIAS}")));
    }

    #[test]
    fn rejects_zero_k() {
        let opts = SearchOptions::new("documents", DistanceMetric::Cosine, 0);
        assert!(build_search_sql(&opts, &vec3()).is_err());
    }

    #[test]
    fn rejects_invalid_table_name() {
        let opts = SearchOptions::new("select", DistanceMetric::Cosine, 5);
        assert!(build_search_sql(&opts, &vec3()).is_err());
    }

    #[test]
    fn stream_search_sql_has_no_limit_clause() {
        let opts = SearchOptions::new("documents", DistanceMetric::Cosine, 1);
        let built = build_stream_search_sql(&opts, &vec3()).unwrap();
        assert!(!built.sql.contains("LIMIT"));
        assert!(built.sql.ends_with("ORDER BY distance ASC"));
    }

    #[test]
    fn paginated_search_sql_has_limit_and_offset() {
        let opts = SearchOptions::new("documents", DistanceMetric::Cosine, 1);
        let built = build_paginated_search_sql(&opts, &vec3(), 50, 100).unwrap();
        assert!(built.sql.ends_with("ORDER BY distance ASC LIMIT 50 OFFSET 100"));
    }

    #[test]
    fn paginated_search_rejects_zero_page_size() {
        let opts = SearchOptions::new("documents", DistanceMetric::Cosine, 1);
        assert!(build_paginated_search_sql(&opts, &vec3(), 0, 0).is_err());
    }
}
