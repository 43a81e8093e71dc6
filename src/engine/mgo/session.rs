//! Document unit of work
//!
//! Each session works on its own copy of the store session, so concurrent
//! units of work never share one in-flight request. There is no transaction;
//! errors are recorded only so `close` can report them.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::compiler::{count_from, match_filter, pipeline, update_set, COUNT_BY};
use super::{document_entity, entity_document, DocumentSource};
use crate::engine::error::{DbError, Result};
use crate::engine::model::{resolve, Entity, EntityMeta};
use crate::engine::nosql::{Document, DocumentSession};
use crate::engine::sqlc::{CacheConfig, Cnd, Pagination};
use crate::engine::util::next_id;

pub struct MgoSession {
    source: Arc<DocumentSource>,
    session: Box<dyn DocumentSession>,
    node: i64,
    errors: Vec<String>,
}

impl MgoSession {
    pub fn open(source: Arc<DocumentSource>, node: Option<i64>) -> Result<Self> {
        let session = source.store().session()?;
        let node = node.unwrap_or(source.settings().node);
        Ok(Self {
            source,
            session,
            node,
            errors: Vec::new(),
        })
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.errors.push(e.to_string());
        }
        result
    }

    fn aggregate(&self, collection: &str, stages: &[Value]) -> Result<Vec<Value>> {
        let start = Instant::now();
        let docs = self.session.aggregate(collection, stages);
        let cost_ms = start.elapsed().as_millis() as u64;
        let settings = self.source.settings();
        if settings.debug {
            let pipeline = Value::Array(stages.to_vec()).to_string();
            tracing::debug!(target: "jorm::mgo", ds = self.source.name(), collection, %pipeline, cost_ms);
        }
        if settings.slow_query_ms > 0 && cost_ms > settings.slow_query_ms {
            let pipeline = Value::Array(stages.to_vec()).to_string();
            tracing::warn!(target: "jorm::mgo", ds = self.source.name(), collection, %pipeline, cost_ms, "slow pipeline");
        }
        Ok(docs?)
    }

    // ========== Writes ==========

    /// Insert or overwrite entities. Missing identities are generated first.
    pub fn save<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        let result = self.save_inner(entities);
        self.record(result)
    }

    fn save_inner<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        if entities.is_empty() {
            return Err(DbError::Input("save: no entities given".to_string()));
        }
        let meta = resolve::<E>()?;
        let mut docs = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            if entity.id() == 0 {
                entity.set_id(next_id(self.node));
            }
            docs.push(entity_document(&meta, entity.id(), &*entity)?);
        }
        self.save_documents_inner(meta.table, docs)
    }

    /// Same as `save`; an existing document is overwritten in place.
    pub fn update<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        self.save(entities)
    }

    /// Probe each document by `_id`: existing ones are replaced one by one,
    /// the rest are inserted in one batch.
    pub fn save_documents(&mut self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let result = self.save_documents_inner(collection, docs);
        self.record(result)
    }

    fn save_documents_inner(&mut self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let mut inserts = Vec::new();
        let mut pending = HashSet::new();
        for doc in docs {
            let probe = [
                json!({ "$match": { "_id": doc.id } }),
                json!({ "$count": COUNT_BY }),
            ];
            let exists = count_from(&self.aggregate(collection, &probe)?) > 0;
            if exists {
                self.session.update_by_id(collection, &doc)?;
            } else if pending.insert(doc.id) {
                inserts.push(doc);
            } else if let Some(earlier) = inserts.iter_mut().find(|d| d.id == doc.id) {
                *earlier = doc;
            }
        }
        if !inserts.is_empty() {
            self.session.insert_many(collection, &inserts)?;
        }
        Ok(())
    }

    /// Remove entities by identity in one bulk delete.
    pub fn delete<E: Entity>(&mut self, entities: &[E]) -> Result<u64> {
        let result = self.delete_inner(entities);
        self.record(result)
    }

    fn delete_inner<E: Entity>(&mut self, entities: &[E]) -> Result<u64> {
        if entities.is_empty() {
            return Err(DbError::Input("delete: no entities given".to_string()));
        }
        let meta = resolve::<E>()?;
        let ids: Vec<i64> = entities.iter().map(Entity::id).collect();
        if ids.contains(&0) {
            return Err(DbError::Input(format!("delete: {} has no identity", meta.type_name)));
        }
        let mut filter = Map::new();
        filter.insert("_id".to_string(), json!({ "$in": ids }));
        Ok(self.session.remove_many(meta.table, &filter)?)
    }

    /// `$set` the update pairs of `cnd` on every matching document.
    pub fn update_by_cnd(&mut self, cnd: &Cnd) -> Result<u64> {
        let result = self.update_by_cnd_inner(cnd);
        self.record(result)
    }

    fn update_by_cnd_inner(&mut self, cnd: &Cnd) -> Result<u64> {
        let meta = model_meta(cnd)?;
        let filter = match_filter(cnd, meta.id_field)?;
        let set = update_set(cnd, meta.id_field)?;
        Ok(self.session.update_many(meta.table, &filter, &set)?)
    }

    // ========== Reads ==========

    /// Count documents matching `cnd`; writes the total and page count back.
    pub fn count(&mut self, cnd: &mut Cnd) -> Result<i64> {
        let result = self.count_inner(cnd);
        self.record(result)
    }

    fn count_inner(&mut self, cnd: &mut Cnd) -> Result<i64> {
        let meta = model_meta(cnd)?;
        let stages = pipeline(cnd, &meta, true)?;
        let total = count_from(&self.aggregate(meta.table, &stages)?);
        cnd.pagination.apply_total(total);
        Ok(total)
    }

    pub fn find_one<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Option<E>> {
        let result = self.find_one_inner(cnd);
        self.record(result)
    }

    fn find_one_inner<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Option<E>> {
        let meta = entity_meta::<E>(cnd)?;
        cnd.pagination = Pagination::offset(0, 1);
        let directive = cnd.cache.clone();
        self.cached(&directive, |session| {
            let stages = pipeline(cnd, &meta, false)?;
            let docs = session.aggregate(meta.table, &stages)?;
            docs.into_iter()
                .next()
                .map(|doc| document_entity(&meta, doc))
                .transpose()
        })
    }

    /// Documents matching `cnd`. In page-number mode without an active cache
    /// directive the total and page count are written back first.
    pub fn find_list<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Vec<E>> {
        let result = self.find_list_inner(cnd);
        self.record(result)
    }

    fn find_list_inner<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Vec<E>> {
        let meta = entity_meta::<E>(cnd)?;
        let directive = cnd.cache.clone();
        if cnd.pagination.is_set() && !cnd.pagination.is_offset && !directive.is_active() {
            let stages = pipeline(cnd, &meta, true)?;
            let total = count_from(&self.aggregate(meta.table, &stages)?);
            cnd.pagination.apply_total(total);
        }
        self.cached(&directive, |session| {
            let stages = pipeline(cnd, &meta, false)?;
            session
                .aggregate(meta.table, &stages)?
                .into_iter()
                .map(|doc| document_entity(&meta, doc))
                .collect()
        })
    }

    /// Read through the source cache when `directive` is active.
    fn cached<T, F>(&mut self, directive: &CacheConfig, run: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if !directive.is_active() {
            return run(self);
        }
        let source = Arc::clone(&self.source);
        let cache = source.cache().ok_or(DbError::CacheNotConfigured)?;
        let key = directive.full_key();
        if let Some(hit) = cache.get(&key)? {
            tracing::debug!(target: "jorm::mgo", key = %key, "cache hit");
            return Ok(serde_json::from_value(hit)?);
        }
        let value = run(self)?;
        cache.put(&key, serde_json::to_value(&value)?, directive.expire)?;
        Ok(value)
    }

    /// End the unit of work, reporting whether any operation failed.
    pub fn close(self) -> Result<()> {
        if !self.errors.is_empty() {
            tracing::warn!(
                target: "jorm::mgo",
                ds = self.source.name(),
                errors = ?self.errors,
                "document unit of work closed with errors"
            );
        }
        Ok(())
    }
}

fn model_meta(cnd: &Cnd) -> Result<Arc<EntityMeta>> {
    match cnd.model_meta() {
        Some(meta) => Ok(meta?),
        None => Err(DbError::Input(
            "condition model has no entity; build it with Cnd::of".to_string(),
        )),
    }
}

fn entity_meta<E: Entity>(cnd: &Cnd) -> Result<Arc<EntityMeta>> {
    match &cnd.model {
        Some(model) if !model.is::<E>() => Err(DbError::Input(format!(
            "condition model targets {}, not {}",
            model.type_name,
            std::any::type_name::<E>()
        ))),
        _ => Ok(resolve::<E>()?),
    }
}
