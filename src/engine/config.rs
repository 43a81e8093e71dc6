//! Jorm Configuration Module
//! Handles loading and validating jorm.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::registry::MASTER;

pub const CONFIG_FILE: &str = "jorm.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Duplicate data source name: {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub relational: Vec<RelationalConfig>,
    #[serde(default)]
    pub document: Vec<DocumentConfig>,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    #[serde(default = "default_ds_name")]
    pub ds_name: String,
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub cache_sync: bool,
    #[serde(default)]
    pub auto_id: bool,
    #[serde(default)]
    pub node: i64,
    #[serde(default)]
    pub slow_query_ms: u64,
    #[serde(default)]
    pub utc_offset_secs: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    #[serde(default = "default_ds_name")]
    pub ds_name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub slow_query_ms: u64,
    #[serde(default)]
    pub node: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_expire_secs")]
    pub default_expire_secs: u64,
}

fn default_ds_name() -> String {
    MASTER.to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_dialect() -> String {
    "mysql".to_string()
}

fn default_expire_secs() -> u64 {
    300
}

impl Config {
    /// Load `jorm.config.json` from `project_dir`.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        Self::from_path(&project_dir.join(CONFIG_FILE))
    }

    /// Load a config file; relative store paths resolve against its directory.
    pub fn from_path(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        if let Some(base) = config_path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_project(name: &str) -> Self {
        Self {
            version: "0.1.0".to_string(),
            relational: vec![RelationalConfig {
                ds_name: default_ds_name(),
                path: PathBuf::from(format!("./data/{}.db", name)),
                pool_size: default_pool_size(),
                dialect: default_dialect(),
                debug: false,
                cache_sync: false,
                auto_id: false,
                node: 0,
                slow_query_ms: 0,
                utc_offset_secs: 0,
            }],
            document: vec![DocumentConfig {
                ds_name: default_ds_name(),
                path: PathBuf::from("./data/docs"),
                debug: false,
                slow_query_ms: 0,
                node: 0,
            }],
            cache: Some(CacheSettings {
                default_expire_secs: default_expire_secs(),
            }),
        }
    }

    /// Names must be unique per engine; one name may appear in both.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for name in self.relational.iter().map(|r| &r.ds_name) {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        seen.clear();
        for name in self.document.iter().map(|d| &d.ds_name) {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.relational.iter_mut().for_each(|r| resolve(&mut r.path));
        self.document.iter_mut().for_each(|d| resolve(&mut d.path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_fill_in() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"version": "0.1.0", "relational": [{"path": "db/app.db"}]}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        let rel = &config.relational[0];
        assert_eq!(rel.ds_name, MASTER);
        assert_eq!(rel.pool_size, 10);
        assert_eq!(rel.dialect, "mysql");
        assert_eq!(rel.path, dir.path().join("db/app.db"));
        assert!(config.document.is_empty());
        assert!(config.cache.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"version": "0.1.0", "document": [{"path": "a"}, {"path": "b"}]}"#,
        )
        .unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        Config::default_for_project("shop").save(dir.path()).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.relational[0].path, dir.path().join("./data/shop.db"));
        assert_eq!(config.cache.map(|c| c.default_expire_secs), Some(300));
    }
}
