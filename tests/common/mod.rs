#![allow(dead_code)]

use jorm::engine::adapter::SqliteSource;
use jorm::engine::mgo::MgoSettings;
use jorm::engine::nosql::FileDocumentStore;
use jorm::engine::rdb::RdbSettings;
use jorm::{DataSources, DocumentSource, Entity, FieldDef, IdDef, Record, RelationalSource, ScalarKind, MASTER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const SCHEMA: &str = "
CREATE TABLE profile (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    tiny INTEGER,
    small INTEGER,
    mid INTEGER,
    big INTEGER,
    tags TEXT,
    scores TEXT,
    born TEXT
);
CREATE TABLE account (
    id INTEGER PRIMARY KEY,
    owner TEXT,
    balance INTEGER
);
CREATE TABLE pet (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER,
    kind TEXT
);
";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub tiny: i8,
    pub small: i16,
    pub mid: i32,
    pub big: i64,
    pub tags: Vec<String>,
    pub scores: BTreeMap<String, i64>,
    pub born: i64,
    pub note: String,
}

impl Record for Profile {
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::string("name"),
        FieldDef::int8("tiny"),
        FieldDef::int16("small"),
        FieldDef::int32("mid"),
        FieldDef::int64("big"),
        FieldDef::slice("tags", ScalarKind::String),
        FieldDef::map("scores", ScalarKind::Int64),
        FieldDef::int64("born").date(),
        FieldDef::string("note").ignored(),
    ];
}

impl Entity for Profile {
    const ID: IdDef = IdDef::new("id", "profile");
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

/// Mirrored into the document store when cache sync is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
}

impl Record for Account {
    const FIELDS: &'static [FieldDef] = &[FieldDef::string("owner"), FieldDef::int64("balance")];
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

/// Points at a table that does not exist, to force execution errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ghost {
    pub id: i64,
    pub name: String,
}

impl Record for Ghost {
    const FIELDS: &'static [FieldDef] = &[FieldDef::string("name")];
}

impl Entity for Ghost {
    const ID: IdDef = IdDef::new("id", "no_such_table");
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

/// Output record of a join query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerPet {
    pub name: String,
    pub kind: String,
}

impl Record for OwnerPet {
    const FIELDS: &'static [FieldDef] = &[FieldDef::string("name"), FieldDef::string("kind")];
}

pub fn relational(dir: &Path, settings: RdbSettings) -> RelationalSource {
    let db = SqliteSource::new(&dir.join("jorm.db"), 4).expect("open sqlite");
    let source = RelationalSource::new(MASTER, db, settings);
    source.execute_batch(SCHEMA).expect("schema");
    source
}

pub fn document(dir: &Path) -> DocumentSource {
    let store = FileDocumentStore::open(&dir.join("docs")).expect("open store");
    DocumentSource::new(MASTER, Arc::new(store), MgoSettings::default())
}

pub fn sources(dir: &Path, settings: RdbSettings) -> DataSources {
    let mut sources = DataSources::new();
    sources.add_relational(relational(dir, settings));
    sources.add_document(document(dir));
    sources
}
