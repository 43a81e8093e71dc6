mod common;

use common::Account;
use jorm::engine::config::{Config, CONFIG_FILE};
use jorm::engine::registry::{global, init};
use jorm::{Cnd, DataSources, DbError, Options};
use tempfile::tempdir;

#[test]
fn test_global_registry_from_config_file() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        r#"{
            "version": "0.1.0",
            "relational": [
                { "path": "data/main.db", "auto_id": true, "node": 2 },
                { "ds_name": "REPORTS", "path": "data/reports.db" }
            ],
            "document": [{ "path": "data/docs" }],
            "cache": { "default_expire_secs": 30 }
        }"#,
    )
    .unwrap();

    assert!(matches!(global(), Err(DbError::NotInitialized)));

    let config = Config::load(dir.path()).unwrap();
    let sources = DataSources::from_config(&config, None).unwrap();
    sources
        .relational_source("MASTER")
        .unwrap()
        .execute_batch(common::SCHEMA)
        .unwrap();
    init(sources).unwrap();
    assert!(matches!(init(DataSources::new()), Err(DbError::AlreadyInitialized)));

    let registry = global().unwrap();
    assert_eq!(registry.relational_names(), vec!["MASTER", "REPORTS"]);
    assert!(registry.document_source("MASTER").unwrap().cache().is_some());
    assert!(dir.path().join("data/reports.db").exists());

    let mut session = registry.relational(&Options::new()).unwrap();
    let mut accounts = vec![Account { id: 0, owner: "ann".into(), balance: 1 }];
    session.save(&mut accounts).unwrap();
    assert!(accounts[0].id > 1 << 22);
    session.close().unwrap();

    let mut docs = registry.document(&Options::new()).unwrap();
    let mut cnd = Cnd::of::<Account>();
    assert_eq!(docs.count(&mut cnd).unwrap(), 0);

    assert!(matches!(
        registry.document(&Options::new().ds("REPORTS")),
        Err(DbError::DataSourceNotFound(_))
    ));
}
