//! SQL composition for insert/update/delete of vector rows.

use ruvector_common::{Error, Result};
use serde_json::Value as JsonValue;

use super::identifier::{quote_identifier, validate_identifier};
use super::search::BuiltQuery;
use super::value::ParamValue;
use crate::vector::Vector;

/// A single row to insert: an optional caller-supplied id, the embedding,
/// and optional metadata.
#[derive(Debug, Clone)]
pub struct InsertRow {
    pub id: Option<ParamValue>,
    pub vector: Vector,
    pub metadata: Option<JsonValue>,
}

/// Options shared by all rows in an insert batch.
#[derive(Debug, Clone)]
pub struct InsertOptions {
    pub table: String,
    pub id_column: String,
    pub vector_column: String,
    pub metadata_column: Option<String>,
    /// Upsert on `conflict_columns` instead of failing on conflict.
    pub upsert: bool,
    /// Columns forming the `ON CONFLICT (...)` target. Defaults to just
    /// the id column, but can name any unique constraint the table has.
    pub conflict_columns: Vec<String>,
    /// Append `RETURNING id_column` to the statement.
    pub returning: bool,
}

impl InsertOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".into(),
            vector_column: "embedding".into(),
            metadata_column: Some("metadata".into()),
            upsert: false,
            conflict_columns: vec!["id".into()],
            returning: true,
        }
    }
}

/// Builds a multi-row `INSERT ... VALUES (...), (...) [ON CONFLICT ... DO
/// UPDATE SET ...] [RETURNING id]`.
///
/// Vector literals are inlined per row (not bindable); ids and metadata are
/// placeholder-bound.
pub fn build_insert_sql(opts: &InsertOptions, rows: &[InsertRow]) -> Result<BuiltQuery> {
    if rows.is_empty() {
        return Err(Error::ValidationError("insert batch cannot be empty".into()));
    }
    validate_identifier(&opts.table)?;
    validate_identifier(&opts.id_column)?;
    validate_identifier(&opts.vector_column)?;
    if let Some(col) = &opts.metadata_column {
        validate_identifier(col)?;
    }
    if opts.upsert {
        if opts.conflict_columns.is_empty() {
            return Err(Error::ValidationError("conflict_columns cannot be empty when upsert is set".into()));
        }
        for col in &opts.conflict_columns {
            validate_identifier(col)?;
        }
    }

    let mut columns = vec![opts.id_column.clone(), opts.vector_column.clone()];
    if opts.metadata_column.is_some() {
        columns.push(opts.metadata_column.clone().unwrap());
    }

    let mut params: Vec<ParamValue> = Vec::new();
    let mut value_groups: Vec<String> = Vec::with_capacity(rows.len());

    for row in rows {
        let mut parts = Vec::with_capacity(columns.len());

        match &row.id {
            Some(id) => {
                params.push(id.clone());
                parts.push(format!("${}", params.len()));
            }
            None => parts.push("DEFAULT".to_string()),
        }

        parts.push(format!("'{}'::vector", row.vector.to_literal()));

        if opts.metadata_column.is_some() {
            params.push(ParamValue::Json(row.metadata.clone().unwrap_or(JsonValue::Null)));
            parts.push(format!("${}", params.len()));
        }

        value_groups.push(format!("({})", parts.join(", ")));
    }

    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(&opts.table),
        quoted_columns.join(", "),
        value_groups.join(", ")
    );

    if opts.upsert {
        let mut set_parts = vec![format!(
            "{} = EXCLUDED.{}",
            quote_identifier(&opts.vector_column),
            quote_identifier(&opts.vector_column)
        )];
        if let Some(col) = &opts.metadata_column {
            set_parts.push(format!(
                "{} = EXCLUDED.{}",
                quote_identifier(col),
                quote_identifier(col)
            ));
        }
        let conflict_target: Vec<String> =
            opts.conflict_columns.iter().map(|c| quote_identifier(c)).collect();
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            conflict_target.join(", "),
            set_parts.join(", ")
        ));
    }

    if opts.returning {
        sql.push_str(&format!(" RETURNING {}", quote_identifier(&opts.id_column)));
    }

    Ok(BuiltQuery { sql, params, session_params: Vec::new() })
}

/// Builds `UPDATE table SET ... WHERE id = $n [RETURNING id]`, including
/// only the columns the caller actually supplied. `merge_metadata` selects
/// between a JSONB merge (`metadata || $n::jsonb`) and a full replace
/// (`metadata = $n::jsonb`).
pub fn build_update_sql(
    opts: &InsertOptions,
    id: ParamValue,
    vector: Option<&Vector>,
    metadata: Option<JsonValue>,
    merge_metadata: bool,
) -> Result<BuiltQuery> {
    validate_identifier(&opts.table)?;
    validate_identifier(&opts.id_column)?;

    if vector.is_none() && metadata.is_none() {
        return Err(Error::ValidationError(
            "update must set at least one of vector or metadata".into(),
        ));
    }

    let mut set_parts = Vec::new();
    let mut params: Vec<ParamValue> = Vec::new();

    if let Some(v) = vector {
        set_parts.push(format!(
            "{} = '{}'::vector",
            quote_identifier(&opts.vector_column),
            v.to_literal()
        ));
    }

    if let Some(col) = &opts.metadata_column {
        if let Some(m) = metadata {
            params.push(ParamValue::Json(m));
            let quoted = quote_identifier(col);
            if merge_metadata {
                set_parts.push(format!(
                    "{quoted} = COALESCE({quoted}, '{{}}'::jsonb) || ${}::jsonb",
                    params.len()
                ));
            } else {
                set_parts.push(format!("{quoted} = ${}::jsonb", params.len()));
            }
        }
    }

    params.push(id);
    let id_param_idx = params.len();

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${} RETURNING {}",
        quote_identifier(&opts.table),
        set_parts.join(", "),
        quote_identifier(&opts.id_column),
        id_param_idx,
        quote_identifier(&opts.id_column)
    );

    Ok(BuiltQuery { sql, params, session_params: Vec::new() })
}

/// Builds `DELETE FROM table WHERE id = $1`.
pub fn build_delete_sql(table: &str, id_column: &str, id: ParamValue) -> Result<BuiltQuery> {
    validate_identifier(table)?;
    validate_identifier(id_column)?;
    Ok(BuiltQuery {
        sql: format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_identifier(table),
            quote_identifier(id_column)
        ),
        params: vec![id],
        session_params: Vec::new(),
    })
}

/// Builds `DELETE FROM table WHERE id = ANY($1)` for a batch of ids.
pub fn build_bulk_delete_sql(table: &str, id_column: &str, ids: Vec<i64>) -> Result<BuiltQuery> {
    if ids.is_empty() {
        return Err(Error::ValidationError("id list cannot be empty".into()));
    }
    validate_identifier(table)?;
    validate_identifier(id_column)?;
    Ok(BuiltQuery {
        sql: format!(
            "DELETE FROM {} WHERE {} = ANY($1)",
            quote_identifier(table),
            quote_identifier(id_column)
        ),
        params: vec![ParamValue::BigIntArray(ids)],
        session_params: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v() -> Vector {
        Vector::new(vec![1.0, 2.0]).unwrap()
    }

    #[test]
    fn builds_single_row_insert_with_default_id() {
        let opts = InsertOptions::new("documents");
        let rows = vec![InsertRow {
            id: None,
            vector: v(),
            metadata: None,
        }];
        let built = build_insert_sql(&opts, &rows).unwrap();
        assert!(built.sql.starts_with("INSERT INTO \"documents\""));
        assert!(built.sql.contains("(DEFAULT, '[1,2]'::vector, $1)"));
        assert!(built.sql.ends_with("RETURNING \"id\""));
    }

    #[test]
    fn builds_multi_row_insert_with_sequential_placeholders() {
        let opts = InsertOptions::new("documents");
        let rows = vec![
            InsertRow { id: Some(ParamValue::BigInt(1)), vector: v(), metadata: None },
            InsertRow { id: Some(ParamValue::BigInt(2)), vector: v(), metadata: None },
        ];
        let built = build_insert_sql(&opts, &rows).unwrap();
        assert!(built.sql.contains("($1, '[1,2]'::vector, $2), ($3, '[1,2]'::vector, $4)"));
        assert_eq!(built.params.len(), 4);
    }

    #[test]
    fn builds_upsert_with_on_conflict() {
        let mut opts = InsertOptions::new("documents");
        opts.upsert = true;
        let rows = vec![InsertRow { id: Some(ParamValue::BigInt(1)), vector: v(), metadata: None }];
        let built = build_insert_sql(&opts, &rows).unwrap();
        assert!(built.sql.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(built.sql.contains("\"embedding\" = EXCLUDED.\"embedding\""));
    }

    #[test]
    fn upsert_honors_custom_conflict_columns() {
        let mut opts = InsertOptions::new("documents");
        opts.upsert = true;
        opts.conflict_columns = vec!["external_id".into()];
        let rows = vec![InsertRow { id: Some(ParamValue::BigInt(1)), vector: v(), metadata: None }];
        let built = build_insert_sql(&opts, &rows).unwrap();
        assert!(built.sql.contains("ON CONFLICT (\"external_id\") DO UPDATE SET"));
    }

    #[test]
    fn returning_false_omits_returning_clause() {
        let mut opts = InsertOptions::new("documents");
        opts.returning = false;
        let rows = vec![InsertRow { id: None, vector: v(), metadata: None }];
        let built = build_insert_sql(&opts, &rows).unwrap();
        assert!(!built.sql.contains("RETURNING"));
    }

    #[test]
    fn rejects_empty_batch() {
        let opts = InsertOptions::new("documents");
        assert!(build_insert_sql(&opts, &[]).is_err());
    }

    #[test]
    fn bulk_delete_uses_any_array() {
        let built = build_bulk_delete_sql("documents", "id", vec![1, 2, 3]).unwrap();
        assert_eq!(built.sql, "DELETE FROM \"documents\" WHERE \"id\" = ANY($1)");
        assert_eq!(built.params.len(), 1);
    }

    #[test]
    fn update_requires_at_least_one_field() {
        let opts = InsertOptions::new("documents");
        assert!(build_update_sql(&opts, ParamValue::BigInt(1), None, None, false).is_err());
    }

    #[test]
    fn update_merge_metadata_uses_jsonb_concat() {
        let opts = InsertOptions::new("documents");
        let built = build_update_sql(
            &opts,
            ParamValue::BigInt(1),
            None,
            Some(serde_json::json!({"a": 1})),
            true,
        )
        .unwrap();
        assert!(built.sql.contains("COALESCE(\"metadata\", '{}'::jsonb) || $1::jsonb"));
    }

    #[test]
    fn update_full_replace_metadata_assigns_directly() {
        let opts = InsertOptions::new("documents");
        let built = build_update_sql(
            &opts,
            ParamValue::BigInt(1),
            None,
            Some(serde_json::json!({"a": 1})),
            false,
        )
        .unwrap();
        assert!(built.sql.contains("\"metadata\" = $1::jsonb"));
    }
}
