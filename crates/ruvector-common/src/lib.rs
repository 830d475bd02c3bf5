//! Shared error types for the RuVector PostgreSQL bridge.

pub mod error;

pub use error::{Error, Result};
