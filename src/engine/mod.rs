// Jorm Engine - Core module structure
pub mod adapter;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod logging;
pub mod mgo;
pub mod model;
pub mod nosql;
pub mod rdb;
pub mod registry;
pub mod sqlc;
pub mod util;

pub use cache::{Cache, LocalCache};
pub use config::Config;
pub use error::{DbError, Result};
pub use mgo::{DocumentSource, MgoSession};
pub use model::{Entity, FieldDef, FieldKind, IdDef, Record, ScalarKind};
pub use rdb::{RdbSession, RelationalSource};
pub use registry::{DataSources, Options, MASTER};
pub use sqlc::{CacheConfig, Cnd, Logic, Pagination, SqlValue};
