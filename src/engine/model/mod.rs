//! Entity model
//!
//! Static field tables for persisted types and the resolver that validates
//! and caches them.

pub mod field;
pub mod resolver;

pub use field::{Entity, FieldDef, FieldKind, IdDef, Record, ScalarKind};
pub use resolver::{meta_of, resolve, resolve_record, EntityMeta, MetaError, RecordMeta};
