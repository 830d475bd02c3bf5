//! Parameter values bound into placeholder-bound SQL.
//!
//! Everything except vector literals and the distance operator goes through
//! here rather than being interpolated into SQL text.

use chrono::{DateTime, Utc};
use ruvector_common::{Error, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::Arguments;
use uuid::Uuid;

/// A value bound as a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParamValue {
    Null,
    Bool(bool),
    BigInt(i64),
    Double(f64),
    Text(String),
    Uuid(Uuid),
    TimestampTz(DateTime<Utc>),
    Json(JsonValue),
    /// Vector of IDs, bound as a native `BIGINT[]` for `= ANY($n)` clauses.
    BigIntArray(Vec<i64>),
}

impl ParamValue {
    pub fn bind(&self, arguments: &mut PgArguments) -> Result<()> {
        let bind_result = match self {
            ParamValue::Null => arguments.add(Option::<i64>::None),
            ParamValue::Bool(v) => arguments.add(*v),
            ParamValue::BigInt(v) => arguments.add(*v),
            ParamValue::Double(v) => arguments.add(*v),
            ParamValue::Text(v) => arguments.add(v.clone()),
            ParamValue::Uuid(v) => arguments.add(*v),
            ParamValue::TimestampTz(v) => arguments.add(*v),
            ParamValue::Json(v) => arguments.add(v.clone()),
            ParamValue::BigIntArray(v) => arguments.add(v.clone()),
        };
        bind_result.map_err(|e| Error::ValidationError(format!("failed to bind parameter: {e}")))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::BigInt(v)
    }
}

impl From<JsonValue> for ParamValue {
    fn from(v: JsonValue) -> Self {
        ParamValue::Json(v)
    }
}

/// Binds a full parameter list into a fresh `PgArguments`, in order.
pub fn bind_all(params: &[ParamValue]) -> Result<PgArguments> {
    let mut arguments = PgArguments::default();
    for param in params {
        param.bind(&mut arguments)?;
    }
    Ok(arguments)
}
