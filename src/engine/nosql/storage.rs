//! File-backed document store
//!
//! One directory per collection under the store root. Every `session()` is an
//! independent handle onto the same directory.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::collection::Collection;
use super::document::Document;
use super::error::{NoSqlError, Result};
use super::pipeline;
use super::{DocumentSession, DocumentStore};

pub struct FileDocumentStore {
    base_path: PathBuf,
}

impl FileDocumentStore {
    /// Open a store, creating the root directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// List all collections
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut collections = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name() {
                    let name = name.to_string_lossy();
                    if !name.starts_with('.') && !name.starts_with('_') {
                        collections.push(name.to_string());
                    }
                }
            }
        }
        collections.sort();
        Ok(collections)
    }
}

impl DocumentStore for FileDocumentStore {
    fn session(&self) -> Result<Box<dyn DocumentSession>> {
        Ok(Box::new(FileSession {
            base_path: self.base_path.clone(),
        }))
    }

    fn ping(&self) -> Result<()> {
        fs::read_dir(&self.base_path)?;
        Ok(())
    }
}

struct FileSession {
    base_path: PathBuf,
}

impl FileSession {
    fn matching(&self, collection: &Collection, filter: &Map<String, Value>) -> Result<Vec<Document>> {
        let mut hits = Vec::new();
        for doc in collection.all()? {
            if pipeline::matches(&doc.to_value(), filter)? {
                hits.push(doc);
            }
        }
        Ok(hits)
    }
}

impl DocumentSession for FileSession {
    fn aggregate(&self, collection: &str, stages: &[Value]) -> Result<Vec<Value>> {
        let docs = match Collection::open(&self.base_path, collection)? {
            Some(col) => col.all()?.iter().map(Document::to_value).collect(),
            None => Vec::new(),
        };
        pipeline::run(docs, stages)
    }

    fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<()> {
        let col = Collection::open_or_create(&self.base_path, collection)?;
        for doc in docs {
            col.insert(doc)?;
        }
        Ok(())
    }

    fn update_by_id(&self, collection: &str, doc: &Document) -> Result<()> {
        Collection::open_or_create(&self.base_path, collection)?.replace(doc)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        set: &Map<String, Value>,
    ) -> Result<u64> {
        let Some(col) = Collection::open(&self.base_path, collection)? else {
            return Ok(0);
        };
        let mut updated = 0;
        for mut doc in self.matching(&col, filter)? {
            for (k, v) in set {
                doc.set(k, v.clone());
            }
            match col.replace(&doc) {
                Ok(()) => updated += 1,
                Err(NoSqlError::DocumentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(updated)
    }

    fn remove_many(&self, collection: &str, filter: &Map<String, Value>) -> Result<u64> {
        let Some(col) = Collection::open(&self.base_path, collection)? else {
            return Ok(0);
        };
        let mut removed = 0;
        for doc in self.matching(&col, filter)? {
            match col.delete(doc.id) {
                Ok(()) => removed += 1,
                Err(NoSqlError::DocumentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}
