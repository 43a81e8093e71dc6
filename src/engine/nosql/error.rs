//! NoSQL Error Types

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoSqlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Document ID already exists: {0}")]
    DuplicateId(i64),
}

pub type Result<T> = std::result::Result<T, NoSqlError>;
