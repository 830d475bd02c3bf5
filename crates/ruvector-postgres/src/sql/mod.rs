//! SQL composition for vector search, mutation, and index DDL.
//!
//! Every identifier used in a query built here is validated before
//! inlining; every scalar value is parameter-bound. Vector literals and
//! distance operators are the two exceptions pgvector forces on us: they
//! are inlined after validating their source (a parsed `Vector`, never raw
//! user text).

mod identifier;
mod index;
mod mutate;
mod search;
mod value;

pub use identifier::{adjust_param_indices, quote_identifier, validate_identifier};
pub use index::{
    build_create_index_sql, build_drop_index_sql, build_index_stats_sql,
    build_list_indices_sql, build_rebuild_index_sql, IndexOptions,
};
pub use mutate::{
    build_bulk_delete_sql, build_delete_sql, build_insert_sql, build_update_sql, InsertOptions,
    InsertRow,
};
pub use search::{
    build_paginated_search_sql, build_search_sql, build_stream_search_sql, BuiltQuery,
    SearchOptions, VECTOR_TEXT_ALIAS,
};
pub use value::{bind_all, ParamValue};
