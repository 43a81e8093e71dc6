//! Database Adapter Layer
//!
//! The relational driver seam: a pooled source, a transaction handle, and the
//! `SqlExecutor` trait both of them run statements through. Rows come back as
//! raw column text for the row decoder.

pub mod dialect;
pub mod sqlite;

pub use dialect::{DialectError, PageDialect, SqlDialect};
pub use sqlite::{SqliteSource, SqliteTx};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::sqlc::SqlValue;

/// Universal result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Runs parameterized statements. Implemented by plain and transactional
/// connections alike.
pub trait SqlExecutor {
    /// Execute a query that returns rows
    fn query_raw(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<RawRows>;

    /// Execute a statement that modifies data
    fn execute(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<ExecResult>;
}

/// One row as raw column text; `None` is SQL NULL.
pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRows {
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Result from an INSERT/UPDATE/DELETE-type statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
    pub execution_time_ms: u64,
}

/// Database adapter errors
#[derive(Debug)]
pub enum AdapterError {
    Connection(String),
    Query(String),
    Transaction(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Connection(e) => write!(f, "Connection error: {}", e),
            AdapterError::Query(e) => write!(f, "Query error: {}", e),
            AdapterError::Transaction(e) => write!(f, "Transaction error: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {}
