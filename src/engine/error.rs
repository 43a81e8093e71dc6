//! Engine error taxonomy

use thiserror::Error;

use super::adapter::{AdapterError, DialectError};
use super::cache::CacheError;
use super::config::ConfigError;
use super::model::MetaError;
use super::nosql::NoSqlError;
use super::rdb::decoder::DecodeError;

#[derive(Error, Debug)]
pub enum DbError {
    /// Wrong arguments; nothing was executed
    #[error("invalid input: {0}")]
    Input(String),

    #[error("metadata error: {0}")]
    Meta(#[from] MetaError),

    /// A value or condition that cannot be mapped to a statement
    #[error("compile error: {0}")]
    Compile(String),

    #[error("dialect error: {0}")]
    Dialect(#[from] DialectError),

    #[error("{0}")]
    Adapter(#[from] AdapterError),

    /// Statement ran but the outcome is wrong
    #[error("data error: {0}")]
    Data(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document store error: {0}")]
    Document(#[from] NoSqlError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("cache manager not initialized")]
    CacheNotConfigured,

    #[error("data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("data sources already initialized")]
    AlreadyInitialized,

    #[error("data sources not initialized")]
    NotInitialized,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, DbError>;
