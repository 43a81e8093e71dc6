//! Relational engine
//!
//! `RelationalSource` is one registered SQL data source; `RdbSession` is a
//! unit of work over it.

pub mod compiler;
pub mod decoder;
pub mod session;

pub use decoder::{Binding, JsonRowDecoder, RowDecoder};
pub use session::RdbSession;

use chrono::FixedOffset;
use std::sync::Arc;

use crate::engine::adapter::{SqlDialect, SqliteSource};
use crate::engine::config::RelationalConfig;
use crate::engine::error::Result;
use crate::engine::util::datetime::{offset_from_secs, utc};

#[derive(Debug, Clone)]
pub struct RdbSettings {
    pub dialect: SqlDialect,
    /// Log every statement
    pub debug: bool,
    /// Mirror flagged entities into the same-named document source
    pub cache_sync: bool,
    /// Draw identities from the snowflake generator
    pub auto_id: bool,
    pub node: i64,
    /// Warn when a statement exceeds this many ms; zero disables
    pub slow_query_ms: u64,
    /// Zone date-flagged fields are rendered in
    pub utc_offset: FixedOffset,
}

impl Default for RdbSettings {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::Mysql,
            debug: false,
            cache_sync: false,
            auto_id: false,
            node: 0,
            slow_query_ms: 0,
            utc_offset: utc(),
        }
    }
}

pub struct RelationalSource {
    name: String,
    db: SqliteSource,
    settings: RdbSettings,
    decoder: Arc<dyn RowDecoder>,
}

impl RelationalSource {
    pub fn new(name: &str, db: SqliteSource, settings: RdbSettings) -> Self {
        let decoder = Arc::new(JsonRowDecoder::new(settings.utc_offset));
        Self {
            name: name.to_string(),
            db,
            settings,
            decoder,
        }
    }

    pub fn open(config: &RelationalConfig) -> Result<Self> {
        let settings = RdbSettings {
            dialect: SqlDialect::parse(&config.dialect)?,
            debug: config.debug,
            cache_sync: config.cache_sync,
            auto_id: config.auto_id,
            node: config.node,
            slow_query_ms: config.slow_query_ms,
            utc_offset: offset_from_secs(config.utc_offset_secs),
        };
        let db = SqliteSource::new(&config.path, config.pool_size)?;
        Ok(Self::new(&config.ds_name, db, settings))
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn RowDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &SqliteSource {
        &self.db
    }

    pub fn settings(&self) -> &RdbSettings {
        &self.settings
    }

    pub fn decoder(&self) -> &dyn RowDecoder {
        self.decoder.as_ref()
    }

    /// Run DDL or other multi-statement scripts outside any session.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.db.execute_batch(sql)?)
    }
}
