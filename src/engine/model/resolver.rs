//! Entity metadata resolution and the process-wide metadata registry

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};
use thiserror::Error;

use super::field::{Entity, FieldDef, FieldKind, Record};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("{0}: identity field name is empty")]
    MissingIdentity(&'static str),

    #[error("{0}: table name is empty")]
    MissingTable(&'static str),

    #[error("{type_name}: field #{index} has no serialization name")]
    MissingFieldName { type_name: &'static str, index: usize },

    #[error("{type_name}: duplicate field name '{name}'")]
    DuplicateField {
        type_name: &'static str,
        name: &'static str,
    },

    #[error("{type_name}: date flag on '{name}' requires an Int64 field")]
    DateKind {
        type_name: &'static str,
        name: &'static str,
    },

    #[error("metadata registry lock poisoned")]
    Poisoned,
}

/// Validated field table of a `Record`.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub type_name: &'static str,
    pub fields: Vec<FieldDef>,
}

impl RecordMeta {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Non-ignored fields in declaration order.
    pub fn persisted(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.ignore)
    }
}

/// Validated metadata of an `Entity`.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub type_name: &'static str,
    pub table: &'static str,
    pub id_field: &'static str,
    pub mirror: bool,
    pub fields: Vec<FieldDef>,
}

impl EntityMeta {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn persisted(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.ignore)
    }

    /// Persisted fields the relational engine can bind and decode.
    pub fn relational(&self) -> impl Iterator<Item = &FieldDef> {
        self.persisted().filter(|f| f.kind.is_relational())
    }
}

type Registry = RwLock<HashMap<TypeId, Arc<EntityMeta>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve (and cache) the metadata of `E`.
pub fn resolve<E: Entity>() -> Result<Arc<EntityMeta>, MetaError> {
    let key = TypeId::of::<E>();
    {
        let cached = registry().read().map_err(|_| MetaError::Poisoned)?;
        if let Some(meta) = cached.get(&key) {
            return Ok(Arc::clone(meta));
        }
    }

    let meta = Arc::new(build::<E>()?);
    let mut cached = registry().write().map_err(|_| MetaError::Poisoned)?;
    Ok(Arc::clone(cached.entry(key).or_insert(meta)))
}

/// Metadata for the type of `value`; works through references and boxes.
pub fn meta_of<E: Entity>(_value: &E) -> Result<Arc<EntityMeta>, MetaError> {
    resolve::<E>()
}

/// Validate the field table of an output record.
pub fn resolve_record<R: Record>() -> Result<RecordMeta, MetaError> {
    let type_name = type_name::<R>();
    check_fields(type_name, R::FIELDS, None)?;
    Ok(RecordMeta {
        type_name,
        fields: R::FIELDS.to_vec(),
    })
}

fn build<E: Entity>() -> Result<EntityMeta, MetaError> {
    let type_name = type_name::<E>();
    let id = E::ID;
    if id.name.trim().is_empty() {
        return Err(MetaError::MissingIdentity(type_name));
    }
    if id.table.trim().is_empty() {
        return Err(MetaError::MissingTable(type_name));
    }
    check_fields(type_name, E::FIELDS, Some(id.name))?;

    Ok(EntityMeta {
        type_name,
        table: id.table,
        id_field: id.name,
        mirror: id.mirror,
        fields: E::FIELDS.to_vec(),
    })
}

fn check_fields(
    type_name: &'static str,
    fields: &[FieldDef],
    id_field: Option<&'static str>,
) -> Result<(), MetaError> {
    let mut seen: HashSet<&'static str> = id_field.into_iter().collect();
    for (index, field) in fields.iter().enumerate() {
        if field.name.trim().is_empty() {
            return Err(MetaError::MissingFieldName { type_name, index });
        }
        if !seen.insert(field.name) {
            return Err(MetaError::DuplicateField {
                type_name,
                name: field.name,
            });
        }
        if field.date && field.kind != FieldKind::Int64 {
            return Err(MetaError::DateKind {
                type_name,
                name: field.name,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::field::{IdDef, ScalarKind};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Account {
        id: i64,
        name: String,
        tags: Vec<String>,
        ctime: i64,
        #[serde(skip)]
        scratch: String,
    }

    impl Record for Account {
        const FIELDS: &'static [FieldDef] = &[
            FieldDef::string("name"),
            FieldDef::slice("tags", ScalarKind::String),
            FieldDef::int64("ctime").date(),
            FieldDef::string("scratch").ignored(),
        ];
    }

    impl Entity for Account {
        const ID: IdDef = IdDef::new("id", "account").mirrored();

        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct NoTable {
        id: i64,
    }

    impl Record for NoTable {
        const FIELDS: &'static [FieldDef] = &[];
    }

    impl Entity for NoTable {
        const ID: IdDef = IdDef::new("id", "");

        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct BadDate {
        id: i64,
        when: String,
    }

    impl Record for BadDate {
        const FIELDS: &'static [FieldDef] = &[FieldDef::string("when").date()];
    }

    impl Entity for BadDate {
        const ID: IdDef = IdDef::new("id", "bad_date");

        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[test]
    fn test_resolve_entity() {
        let meta = resolve::<Account>().unwrap();
        assert_eq!(meta.table, "account");
        assert_eq!(meta.id_field, "id");
        assert!(meta.mirror);
        assert_eq!(meta.persisted().count(), 3);
        assert!(meta.field("ctime").unwrap().date);

        let again = meta_of(&Account::default()).unwrap();
        assert!(Arc::ptr_eq(&meta, &again));
        let boxed = Box::new(Account::default());
        assert!(Arc::ptr_eq(&meta, &meta_of(boxed.as_ref()).unwrap()));
    }

    #[test]
    fn test_missing_table() {
        assert!(matches!(
            resolve::<NoTable>(),
            Err(MetaError::MissingTable(_))
        ));
    }

    #[test]
    fn test_date_flag_requires_int64() {
        assert!(matches!(
            resolve::<BadDate>(),
            Err(MetaError::DateKind { name: "when", .. })
        ));
    }
}
