//! Document store driver
//!
//! The seam the document engine talks to: a store hands out sessions, a
//! session runs aggregation pipelines and bulk writes against named
//! collections. `FileDocumentStore` is the bundled implementation.

pub mod collection;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use document::Document;
pub use error::NoSqlError;
pub use storage::FileDocumentStore;

use serde_json::{Map, Value};

use error::Result;

pub trait DocumentStore: Send + Sync {
    /// An independent session onto the store.
    fn session(&self) -> Result<Box<dyn DocumentSession>>;

    fn ping(&self) -> Result<()>;
}

/// Closed by dropping.
pub trait DocumentSession {
    /// Run an aggregation pipeline. A missing collection yields no documents.
    fn aggregate(&self, collection: &str, stages: &[Value]) -> Result<Vec<Value>>;

    /// Insert new documents; an existing `_id` is an error.
    fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<()>;

    /// Replace the document with the same `_id`.
    fn update_by_id(&self, collection: &str, doc: &Document) -> Result<()>;

    /// `$set` fields on every document matching `filter`.
    fn update_many(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        set: &Map<String, Value>,
    ) -> Result<u64>;

    fn remove_many(&self, collection: &str, filter: &Map<String, Value>) -> Result<u64>;
}
