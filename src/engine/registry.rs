//! Data source registry
//!
//! Maps data-source names to opened engines. A `DataSources` is built once
//! at startup; `init` publishes it process-wide and `global` reads it back
//! without locking.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::cache::{Cache, LocalCache};
use super::config::Config;
use super::error::{DbError, Result};
use super::mgo::{DocumentSource, MgoSession};
use super::rdb::{RdbSession, RelationalSource};

/// Name used when a session does not pick a data source.
pub const MASTER: &str = "MASTER";

/// Per-session choices. Unset values fall back to the data source settings.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub ds_name: Option<String>,
    /// Hold one transaction for the whole relational unit of work
    pub auto_tx: bool,
    pub cache_sync: Option<bool>,
    pub auto_id: Option<bool>,
    pub node: Option<i64>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ds(mut self, name: &str) -> Self {
        self.ds_name = Some(name.to_string());
        self
    }

    pub fn auto_tx(mut self) -> Self {
        self.auto_tx = true;
        self
    }

    pub fn cache_sync(mut self, on: bool) -> Self {
        self.cache_sync = Some(on);
        self
    }

    pub fn auto_id(mut self, on: bool) -> Self {
        self.auto_id = Some(on);
        self
    }

    pub fn node(mut self, node: i64) -> Self {
        self.node = Some(node);
        self
    }

    fn name(&self) -> &str {
        self.ds_name.as_deref().unwrap_or(MASTER)
    }
}

#[derive(Default)]
pub struct DataSources {
    relational: HashMap<String, Arc<RelationalSource>>,
    document: HashMap<String, Arc<DocumentSource>>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every source in `config`. Without an explicit cache, a `cache`
    /// section builds a `LocalCache` shared by all document sources.
    pub fn from_config(config: &Config, cache: Option<Arc<dyn Cache>>) -> Result<Self> {
        let cache = cache.or_else(|| {
            config.cache.as_ref().map(|c| {
                Arc::new(LocalCache::new(Duration::from_secs(c.default_expire_secs))) as Arc<dyn Cache>
            })
        });

        let mut sources = Self::new();
        for rel in &config.relational {
            sources.add_relational(RelationalSource::open(rel)?);
            tracing::info!(ds = %rel.ds_name, path = %rel.path.display(), "relational source opened");
        }
        for doc in &config.document {
            sources.add_document(DocumentSource::open(doc, cache.clone())?);
            tracing::info!(ds = %doc.ds_name, path = %doc.path.display(), "document source opened");
        }
        Ok(sources)
    }

    pub fn add_relational(&mut self, source: RelationalSource) -> &mut Self {
        self.relational
            .insert(source.name().to_string(), Arc::new(source));
        self
    }

    pub fn add_document(&mut self, source: DocumentSource) -> &mut Self {
        self.document
            .insert(source.name().to_string(), Arc::new(source));
        self
    }

    pub fn relational_source(&self, name: &str) -> Result<Arc<RelationalSource>> {
        self.relational
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::DataSourceNotFound(name.to_string()))
    }

    pub fn document_source(&self, name: &str) -> Result<Arc<DocumentSource>> {
        self.document
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::DataSourceNotFound(name.to_string()))
    }

    /// Open a relational unit of work. Cache sync mirrors into the document
    /// source registered under the same name.
    pub fn relational(&self, options: &Options) -> Result<RdbSession> {
        let source = self.relational_source(options.name())?;
        let mirror = self.document.get(options.name()).cloned();
        RdbSession::open(source, mirror, options)
    }

    pub fn document(&self, options: &Options) -> Result<MgoSession> {
        let source = self.document_source(options.name())?;
        MgoSession::open(source, options.node)
    }

    pub fn relational_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.relational.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn document_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.document.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check every source answers.
    pub fn ping(&self) -> Vec<(String, Result<()>)> {
        let mut out = Vec::new();
        for name in self.relational_names() {
            let res = self
                .relational_source(name)
                .and_then(|s| Ok(s.db().test_connection()?));
            out.push((format!("relational:{}", name), res));
        }
        for name in self.document_names() {
            let res = self.document_source(name).and_then(|s| s.ping());
            out.push((format!("document:{}", name), res));
        }
        out
    }
}

static GLOBAL: OnceLock<DataSources> = OnceLock::new();

/// Publish `sources` process-wide. Only the first call succeeds.
pub fn init(sources: DataSources) -> Result<()> {
    GLOBAL.set(sources).map_err(|_| DbError::AlreadyInitialized)
}

pub fn global() -> Result<&'static DataSources> {
    GLOBAL.get().ok_or(DbError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::SqliteSource;
    use crate::engine::config::{DocumentConfig, RelationalConfig};
    use crate::engine::rdb::RdbSettings;
    use tempfile::tempdir;

    #[test]
    fn test_unknown_name() {
        let mut sources = DataSources::new();
        sources.add_relational(RelationalSource::new(
            MASTER,
            SqliteSource::in_memory().unwrap(),
            RdbSettings::default(),
        ));
        assert!(sources.relational(&Options::new()).is_ok());
        assert!(matches!(
            sources.relational(&Options::new().ds("other")),
            Err(DbError::DataSourceNotFound(name)) if name == "other"
        ));
        assert!(matches!(
            sources.document(&Options::new()),
            Err(DbError::DataSourceNotFound(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let config = Config {
            version: "0.1.0".to_string(),
            relational: vec![RelationalConfig {
                ds_name: MASTER.to_string(),
                path: dir.path().join("app.db"),
                pool_size: 2,
                dialect: "mysql".to_string(),
                debug: true,
                cache_sync: true,
                auto_id: false,
                node: 1,
                slow_query_ms: 0,
                utc_offset_secs: 0,
            }],
            document: vec![DocumentConfig {
                ds_name: MASTER.to_string(),
                path: dir.path().join("docs"),
                debug: false,
                slow_query_ms: 0,
                node: 1,
            }],
            cache: None,
        };
        let sources = DataSources::from_config(&config, None).unwrap();
        assert_eq!(sources.relational_names(), vec![MASTER]);
        assert_eq!(sources.document_names(), vec![MASTER]);
        assert!(sources.ping().iter().all(|(_, r)| r.is_ok()));
        assert!(sources.document_source(MASTER).unwrap().cache().is_none());
    }

    #[test]
    fn test_unknown_dialect_fails_open() {
        let dir = tempdir().unwrap();
        let mut config = Config::default_for_project("x");
        config.relational[0].path = dir.path().join("x.db");
        config.relational[0].dialect = "cobol".to_string();
        config.document.clear();
        assert!(DataSources::from_config(&config, None).is_err());
    }
}
