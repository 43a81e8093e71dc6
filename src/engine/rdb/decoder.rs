//! Row decoding
//!
//! Turns raw column text into a JSON object keyed by serialization name,
//! converting each column according to its declared kind. serde then builds
//! the typed record from that object.

use chrono::FixedOffset;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::engine::adapter::RawRow;
use crate::engine::model::{FieldKind, ScalarKind};
use crate::engine::util::datetime::{string_to_millis, utc};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("column '{column}': cannot decode '{raw}' as {expected}")]
    Parse {
        column: String,
        raw: String,
        expected: &'static str,
    },

    #[error("column '{column}': {kind:?} has no relational mapping")]
    Unsupported { column: String, kind: FieldKind },

    #[error("row has {got} columns, expected {want}")]
    Width { got: usize, want: usize },
}

/// Target of one result column
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub key: &'a str,
    pub kind: FieldKind,
    pub date: bool,
}

impl<'a> Binding<'a> {
    pub fn new(key: &'a str, kind: FieldKind, date: bool) -> Self {
        Self { key, kind, date }
    }
}

pub trait RowDecoder: Send + Sync {
    fn decode(&self, bindings: &[Binding<'_>], row: &RawRow) -> Result<Map<String, Value>, DecodeError>;
}

/// Decodes into serde_json values; date strings are read in `offset`.
pub struct JsonRowDecoder {
    offset: FixedOffset,
}

impl JsonRowDecoder {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for JsonRowDecoder {
    fn default() -> Self {
        Self::new(utc())
    }
}

impl RowDecoder for JsonRowDecoder {
    fn decode(&self, bindings: &[Binding<'_>], row: &RawRow) -> Result<Map<String, Value>, DecodeError> {
        if bindings.len() != row.len() {
            return Err(DecodeError::Width {
                got: row.len(),
                want: bindings.len(),
            });
        }

        let mut out = Map::with_capacity(bindings.len());
        for (binding, raw) in bindings.iter().zip(row) {
            let Some(text) = raw.as_deref().filter(|t| !t.is_empty()) else {
                continue;
            };
            out.insert(binding.key.to_string(), self.decode_column(binding, text)?);
        }
        Ok(out)
    }
}

impl JsonRowDecoder {
    fn decode_column(&self, binding: &Binding<'_>, text: &str) -> Result<Value, DecodeError> {
        let parse_err = |expected: &'static str| DecodeError::Parse {
            column: binding.key.to_string(),
            raw: text.to_string(),
            expected,
        };

        match binding.kind {
            FieldKind::String => Ok(Value::String(text.to_string())),
            FieldKind::Int64 if binding.date => match text.parse::<i64>() {
                Ok(n) => Ok(Value::from(n)),
                Err(_) => string_to_millis(text, self.offset)
                    .map(Value::from)
                    .ok_or_else(|| parse_err("date")),
            },
            FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64 => {
                let scalar = int_scalar(binding.kind);
                text.parse::<i64>()
                    .ok()
                    .filter(|n| fits(scalar, *n))
                    .map(Value::from)
                    .ok_or_else(|| parse_err(scalar_name(scalar)))
            }
            FieldKind::Slice(elem) => {
                let value: Value = serde_json::from_str(text).map_err(|_| parse_err("JSON array"))?;
                if matches!(&value, Value::Array(items) if items.iter().all(|v| elem_ok(elem, v))) {
                    Ok(value)
                } else {
                    Err(parse_err("JSON array"))
                }
            }
            FieldKind::Map(elem) => {
                let value: Value = serde_json::from_str(text).map_err(|_| parse_err("JSON object"))?;
                if matches!(&value, Value::Object(map) if map.values().all(|v| elem_ok(elem, v))) {
                    Ok(value)
                } else {
                    Err(parse_err("JSON object"))
                }
            }
            FieldKind::Bool | FieldKind::Float => Err(DecodeError::Unsupported {
                column: binding.key.to_string(),
                kind: binding.kind,
            }),
        }
    }
}

fn int_scalar(kind: FieldKind) -> ScalarKind {
    match kind {
        FieldKind::Int8 => ScalarKind::Int8,
        FieldKind::Int16 => ScalarKind::Int16,
        FieldKind::Int32 => ScalarKind::Int32,
        _ => ScalarKind::Int64,
    }
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::String => "string",
        ScalarKind::Int8 => "int8",
        ScalarKind::Int16 => "int16",
        ScalarKind::Int32 => "int32",
        ScalarKind::Int64 => "int64",
        ScalarKind::Any => "any",
    }
}

fn fits(kind: ScalarKind, n: i64) -> bool {
    match kind {
        ScalarKind::Int8 => i8::try_from(n).is_ok(),
        ScalarKind::Int16 => i16::try_from(n).is_ok(),
        ScalarKind::Int32 => i32::try_from(n).is_ok(),
        _ => true,
    }
}

fn elem_ok(kind: ScalarKind, v: &Value) -> bool {
    match kind {
        ScalarKind::Any => true,
        ScalarKind::String => v.is_string(),
        int => v.as_i64().map(|n| fits(int, n)).unwrap_or(false),
    }
}

/// First column of the first row as an integer; no rows is zero.
pub fn scalar_count(rows: &[RawRow]) -> Result<i64, DecodeError> {
    match rows.first().and_then(|row| row.first()) {
        None | Some(None) => Ok(0),
        Some(Some(text)) => text.parse::<i64>().map_err(|_| DecodeError::Parse {
            column: "count".to_string(),
            raw: text.clone(),
            expected: "int64",
        }),
    }
}
