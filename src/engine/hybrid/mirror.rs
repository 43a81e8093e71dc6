//! Cross-store mirroring
//!
//! Relational writes of mirror-flagged entities are queued as documents and
//! written to the document source when the relational unit of work closes.
//! Failures are logged and never undo the relational write.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::error::Result;
use crate::engine::mgo::{entity_document, DocumentSource, MgoSession};
use crate::engine::model::{Entity, EntityMeta};
use crate::engine::nosql::Document;

/// Documents waiting for the close of a relational unit of work, grouped by
/// collection in queue order.
#[derive(Debug, Default)]
pub struct MirrorQueue {
    pending: BTreeMap<String, Vec<Document>>,
}

impl MirrorQueue {
    pub fn push<E: Entity>(&mut self, meta: &EntityMeta, entity: &E) -> Result<()> {
        let doc = entity_document(meta, entity.id(), entity)?;
        self.pending
            .entry(meta.table.to_string())
            .or_default()
            .push(doc);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write every queued document; returns how many collections failed.
    pub fn flush(self, target: &Arc<DocumentSource>) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let mut session = match MgoSession::open(Arc::clone(target), None) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(ds = target.name(), error = %e, "mirror session unavailable, {} documents dropped", self.len());
                return self.pending.len();
            }
        };

        let mut failed = 0;
        for (collection, docs) in self.pending {
            let count = docs.len();
            match session.save_documents(&collection, docs) {
                Ok(()) => tracing::debug!(ds = target.name(), collection, count, "mirrored"),
                Err(e) => {
                    failed += 1;
                    tracing::error!(ds = target.name(), collection, count, error = %e, "mirror write failed");
                }
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mgo::MgoSettings;
    use crate::engine::model::{resolve, FieldDef, IdDef, Record};
    use crate::engine::nosql::FileDocumentStore;
    use crate::engine::sqlc::Cnd;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Order {
        id: i64,
        sku: String,
        qty: i32,
    }

    impl Record for Order {
        const FIELDS: &'static [FieldDef] = &[FieldDef::string("sku"), FieldDef::int32("qty")];
    }

    impl Entity for Order {
        const ID: IdDef = IdDef::new("id", "orders").mirrored();
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[test]
    fn test_flush_upserts_queued_documents() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();
        let target = Arc::new(DocumentSource::new("MASTER", Arc::new(store), MgoSettings::default()));
        let meta = resolve::<Order>().unwrap();

        let mut queue = MirrorQueue::default();
        queue.push(&meta, &Order { id: 7, sku: "a".into(), qty: 1 }).unwrap();
        queue.push(&meta, &Order { id: 8, sku: "b".into(), qty: 2 }).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.flush(&target), 0);

        let mut again = MirrorQueue::default();
        again.push(&meta, &Order { id: 7, sku: "a".into(), qty: 5 }).unwrap();
        assert_eq!(again.flush(&target), 0);

        let mut session = MgoSession::open(Arc::clone(&target), None).unwrap();
        let mut cnd = Cnd::of::<Order>().asc("id");
        let orders: Vec<Order> = session.find_list(&mut cnd).unwrap();
        assert_eq!(
            orders,
            vec![
                Order { id: 7, sku: "a".into(), qty: 5 },
                Order { id: 8, sku: "b".into(), qty: 2 },
            ]
        );
    }

    #[test]
    fn test_flush_reports_failed_collections() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("docs");
        let store = FileDocumentStore::open(&root).unwrap();
        let target = Arc::new(DocumentSource::new("MASTER", Arc::new(store), MgoSettings::default()));
        std::fs::remove_dir(&root).unwrap();
        std::fs::write(&root, "not a directory").unwrap();

        let meta = resolve::<Order>().unwrap();
        let mut queue = MirrorQueue::default();
        queue.push(&meta, &Order { id: 1, sku: "a".into(), qty: 1 }).unwrap();
        assert_eq!(queue.flush(&target), 1);
    }

    #[test]
    fn test_empty_queue_flushes_nothing() {
        let dir = tempdir().unwrap();
        let store = FileDocumentStore::open(dir.path()).unwrap();
        let target = Arc::new(DocumentSource::new("MASTER", Arc::new(store), MgoSettings::default()));
        let queue = MirrorQueue::default();
        assert!(queue.is_empty());
        assert_eq!(queue.flush(&target), 0);
    }
}
