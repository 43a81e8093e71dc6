//! Document engine
//!
//! `DocumentSource` is one registered document store; `MgoSession` is a unit
//! of work over a session copied from it. Reads compile to aggregation
//! pipelines and may go through the source's cache.

pub mod compiler;
pub mod session;

pub use session::MgoSession;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::engine::cache::Cache;
use crate::engine::config::DocumentConfig;
use crate::engine::error::{DbError, Result};
use crate::engine::model::EntityMeta;
use crate::engine::nosql::{Document, DocumentStore, FileDocumentStore};

#[derive(Debug, Clone, Default)]
pub struct MgoSettings {
    pub debug: bool,
    pub slow_query_ms: u64,
    /// Snowflake node for identities assigned on save
    pub node: i64,
}

pub struct DocumentSource {
    name: String,
    store: Arc<dyn DocumentStore>,
    cache: Option<Arc<dyn Cache>>,
    settings: MgoSettings,
}

impl DocumentSource {
    pub fn new(name: &str, store: Arc<dyn DocumentStore>, settings: MgoSettings) -> Self {
        Self {
            name: name.to_string(),
            store,
            cache: None,
            settings,
        }
    }

    /// Open the file-backed store described by `config`.
    pub fn open(config: &DocumentConfig, cache: Option<Arc<dyn Cache>>) -> Result<Self> {
        let store = FileDocumentStore::open(&config.path)?;
        let settings = MgoSettings {
            debug: config.debug,
            slow_query_ms: config.slow_query_ms,
            node: config.node,
        };
        let mut source = Self::new(&config.ds_name, Arc::new(store), settings);
        source.cache = cache;
        Ok(source)
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> Option<&dyn Cache> {
        self.cache.as_deref()
    }

    pub fn settings(&self) -> &MgoSettings {
        &self.settings
    }

    pub fn ping(&self) -> Result<()> {
        Ok(self.store.ping()?)
    }
}

/// Stored form of an entity: identity becomes `_id`, ignored fields are
/// dropped.
pub fn entity_document<E: Serialize>(meta: &EntityMeta, id: i64, entity: &E) -> Result<Document> {
    let mut data = match serde_json::to_value(entity)? {
        Value::Object(map) => map,
        other => {
            return Err(DbError::Compile(format!(
                "{} serialized to non-object {}",
                meta.type_name, other
            )))
        }
    };
    data.remove(meta.id_field);
    for field in meta.fields.iter().filter(|f| f.ignore) {
        data.remove(field.name);
    }
    Ok(Document::new(id, data))
}

/// Entity from a pipeline output document; `_id` is renamed to the identity
/// field unless a `$group` already produced it.
pub fn document_entity<E: DeserializeOwned>(meta: &EntityMeta, doc: Value) -> Result<E> {
    let mut map = match doc {
        Value::Object(map) => map,
        other => {
            return Err(DbError::Data(format!(
                "pipeline returned non-document {}",
                other
            )))
        }
    };
    if let Some(id) = map.remove("_id") {
        if !map.contains_key(meta.id_field) {
            map.insert(meta.id_field.to_string(), id);
        }
    }
    Ok(serde_json::from_value(Value::Object(map))?)
}

