//! SQL identifier quoting and validation.

use ruvector_common::{Error, Result};
use unicode_normalization::UnicodeNormalization;

/// Quotes a SQL identifier, double-quoting each dot-separated part of a
/// schema-qualified name separately.
pub fn quote_identifier(name: &str) -> String {
    if name.contains('.') {
        name.split('.')
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join(".")
    } else {
        format!("\"{name}\"")
    }
}

/// Validates a table/column identifier, accepting either a simple name or a
/// two-part `schema.table` name.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ValidationError("identifier cannot be empty".into()));
    }

    if name.contains('.') {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 2 {
            return Err(Error::ValidationError(format!(
                "invalid schema-qualified identifier '{name}': must be 'schema.table'"
            )));
        }
        for part in parts {
            validate_identifier_part(part)?;
        }
        return Ok(());
    }

    validate_identifier_part(name)
}

const SQL_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant",
    "revoke", "exec", "execute", "union", "declare", "table", "index", "view", "schema",
    "database", "user", "role", "from", "where", "join", "inner", "outer", "left", "right", "on",
    "using", "and", "or", "not", "in", "exists", "between", "like", "ilike", "is", "null", "true",
    "false", "case", "when", "then", "else", "end", "as", "order", "by", "group", "having",
    "limit", "offset", "distinct", "all", "any", "some",
];

/// Validates a single identifier part (no dots allowed).
pub fn validate_identifier_part(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ValidationError(
            "identifier part cannot be empty".into(),
        ));
    }

    let normalized = name.nfkc().collect::<String>();

    if normalized.len() > 63 {
        return Err(Error::ValidationError(format!(
            "identifier '{normalized}' exceeds maximum length of 63"
        )));
    }

    let first_char = normalized.chars().next().ok_or_else(|| {
        Error::ValidationError(format!("identifier '{normalized}' is empty or invalid"))
    })?;
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(Error::ValidationError(format!(
            "identifier '{normalized}' must start with a letter or underscore"
        )));
    }

    for ch in normalized.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(Error::ValidationError(format!(
                "identifier '{normalized}' contains invalid character '{ch}'"
            )));
        }
    }

    let lower = normalized.to_lowercase();
    if lower.starts_with("pg_") {
        return Err(Error::ValidationError(format!(
            "access to PostgreSQL system catalog '{normalized}' is not allowed"
        )));
    }
    if lower == "information_schema" {
        return Err(Error::ValidationError(
            "access to information_schema is not allowed".into(),
        ));
    }
    if SQL_KEYWORDS.contains(&lower.as_str()) {
        return Err(Error::ValidationError(format!(
            "identifier '{normalized}' is a reserved SQL keyword"
        )));
    }

    Ok(())
}

/// Adjusts `$N` parameter placeholders in `sql` by adding `offset` to each
/// index, used when a caller's custom WHERE clause needs its own parameters
/// renumbered to come after the ones the builder already emitted.
pub fn adjust_param_indices(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let mut num_str = String::new();
            while let Some(&next_ch) = chars.peek() {
                if next_ch.is_ascii_digit() {
                    num_str.push(chars.next().unwrap());
                } else {
                    break;
                }
            }
            if num_str.is_empty() {
                result.push('$');
            } else if let Ok(num) = num_str.parse::<usize>() {
                result.push('$');
                result.push_str(&(num + offset).to_string());
            } else {
                result.push('$');
                result.push_str(&num_str);
            }
        } else {
            result.push(ch);
        }
    }

    result
}
