//! Jorm - one condition model, two stores
//!
//! A `Cnd` describes predicates, projection, ordering, paging and caching
//! once. The relational engine compiles it to SQL; the document engine
//! compiles it to an aggregation pipeline. Both run inside unit-of-work
//! sessions handed out by a `DataSources` registry.

pub mod engine;

pub use engine::{
    Cache, CacheConfig, Cnd, DataSources, DbError, DocumentSource, Entity, FieldDef, FieldKind,
    IdDef, LocalCache, Logic, MgoSession, Options, Pagination, RdbSession, Record,
    RelationalSource, Result, ScalarKind, SqlValue, MASTER,
};
