//! Document representation for NoSQL storage

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{NoSqlError, Result};

/// A stored document: integer `_id` plus its fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: i64,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: i64, mut data: Map<String, Value>) -> Self {
        data.remove("_id");
        Self { id, data }
    }

    /// Build from a JSON object carrying an integer `_id`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut data) = value else {
            return Err(NoSqlError::InvalidDocument("not a JSON object".to_string()));
        };
        let id = data
            .remove("_id")
            .and_then(|id| id.as_i64())
            .ok_or_else(|| NoSqlError::InvalidDocument("missing integer _id".to_string()))?;
        Ok(Self { id, data })
    }

    /// JSON object with `_id` first.
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.data.len() + 1);
        out.insert("_id".to_string(), Value::from(self.id));
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        if field != "_id" {
            self.data.insert(field.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_round_trip() {
        let doc = Document::from_value(json!({"_id": 9, "name": "test", "value": 42})).unwrap();
        assert_eq!(doc.id, 9);
        assert_eq!(doc.get("name"), Some(&json!("test")));
        assert_eq!(doc.to_value(), json!({"_id": 9, "name": "test", "value": 42}));
    }

    #[test]
    fn test_requires_integer_id() {
        assert!(Document::from_value(json!({"_id": "x"})).is_err());
        assert!(Document::from_value(json!([1])).is_err());
    }
}
