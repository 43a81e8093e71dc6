//! Field descriptors
//!
//! Entities describe their persisted shape with a static table of
//! `FieldDef`s. Serialization itself stays with serde; the table only
//! carries what serde cannot express: the declared kind of each field and
//! the ignore/date flags.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Element kind of a list or map field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    /// Any JSON value
    Any,
}

/// Declared kind of a persisted field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    /// Ordered list, stored relationally as a JSON text column
    Slice(ScalarKind),
    /// String-keyed map, stored relationally as a JSON text column
    Map(ScalarKind),
    /// Document-only
    Bool,
    /// Document-only
    Float,
}

impl FieldKind {
    /// Whether the relational engine can bind and decode this kind.
    pub fn is_relational(&self) -> bool {
        !matches!(self, FieldKind::Bool | FieldKind::Float)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64
        )
    }
}

/// One persisted field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Serialization name; doubles as the column / document field name
    pub name: &'static str,
    pub kind: FieldKind,
    /// Never persisted
    pub ignore: bool,
    /// Int64 epoch milliseconds stored as a date string
    pub date: bool,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            ignore: false,
            date: false,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub const fn int8(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int8)
    }

    pub const fn int16(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int16)
    }

    pub const fn int32(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int32)
    }

    pub const fn int64(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int64)
    }

    pub const fn slice(name: &'static str, elem: ScalarKind) -> Self {
        Self::new(name, FieldKind::Slice(elem))
    }

    pub const fn map(name: &'static str, elem: ScalarKind) -> Self {
        Self::new(name, FieldKind::Map(elem))
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub const fn float(name: &'static str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub const fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub const fn date(mut self) -> Self {
        self.date = true;
        self
    }
}

/// Identity declaration of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdDef {
    /// Serialization name of the identity field
    pub name: &'static str,
    /// Table or collection name
    pub table: &'static str,
    /// Mirror saved entities into the document store
    pub mirror: bool,
}

impl IdDef {
    pub const fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            mirror: false,
        }
    }

    pub const fn mirrored(mut self) -> Self {
        self.mirror = true;
        self
    }
}

/// A serde type with a declared field table.
///
/// Output types of `find_complex` only need this trait. Implementors should
/// carry `#[serde(default)]` so rows that do not project every field still
/// decode.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Persisted fields, identity excluded, in declaration order.
    const FIELDS: &'static [FieldDef];
}

/// A persistable record with an `i64` identity.
pub trait Entity: Record {
    const ID: IdDef;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);
}
