//! Collection management for NoSQL storage

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::document::Document;
use super::error::{NoSqlError, Result};

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A directory of `<_id>.json` files
pub struct Collection {
    pub name: String,
    path: PathBuf,
}

impl Collection {
    /// Open a collection if it exists on disk.
    pub fn open(base_path: &Path, name: &str) -> Result<Option<Self>> {
        validate_collection_name(name)?;
        let path = base_path.join(name);
        if !path.is_dir() {
            return Ok(None);
        }
        Ok(Some(Self {
            name: name.to_string(),
            path,
        }))
    }

    /// Open a collection, creating it on first write.
    pub fn open_or_create(base_path: &Path, name: &str) -> Result<Self> {
        validate_collection_name(name)?;
        let path = base_path.join(name);
        fs::create_dir_all(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    fn doc_path(&self, id: i64) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }

    /// Write through a temp file so readers never see a partial document.
    fn write(&self, doc_path: &Path, doc: &Document) -> Result<()> {
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .path
            .join(format!(".{}.{}.{}.tmp", doc.id, std::process::id(), seq));
        fs::write(&tmp_path, serde_json::to_string_pretty(doc)?)?;
        if let Err(e) = fs::rename(&tmp_path, doc_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn insert(&self, doc: &Document) -> Result<()> {
        let doc_path = self.doc_path(doc.id);
        if doc_path.exists() {
            return Err(NoSqlError::DuplicateId(doc.id));
        }
        self.write(&doc_path, doc)
    }

    pub fn get(&self, id: i64) -> Result<Document> {
        self.read(id)?.ok_or(NoSqlError::DocumentNotFound(id))
    }

    /// Read a document, `None` when it is absent or was removed meanwhile.
    pub fn read(&self, id: i64) -> Result<Option<Document>> {
        match fs::read_to_string(self.doc_path(id)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite an existing document.
    pub fn replace(&self, doc: &Document) -> Result<()> {
        let doc_path = self.doc_path(doc.id);
        if !doc_path.exists() {
            return Err(NoSqlError::DocumentNotFound(doc.id));
        }
        self.write(&doc_path, doc)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        match fs::remove_file(self.doc_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(NoSqlError::DocumentNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// All document ids, ascending.
    pub fn list_ids(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(id) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<i64>().ok())
                {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Snapshot of every document; ids deleted after listing are skipped.
    pub fn all(&self) -> Result<Vec<Document>> {
        let ids = self.list_ids()?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.read(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NoSqlError::InvalidCollectionName("name cannot be empty".to_string()));
    }

    if name.starts_with('_') {
        return Err(NoSqlError::InvalidCollectionName("name cannot start with underscore".to_string()));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(NoSqlError::InvalidCollectionName("name must be alphanumeric".to_string()));
    }

    Ok(())
}
