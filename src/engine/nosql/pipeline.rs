//! In-process aggregation pipeline evaluator
//!
//! Supports the stages the document engine emits: `$match`, `$project`,
//! `$sort`, `$group`, `$skip`, `$limit`, `$count`.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use super::error::{NoSqlError, Result};

/// Run `pipeline` over `docs` in order.
pub fn run(docs: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>> {
    let mut docs = docs;
    for stage in pipeline {
        let (name, spec) = single_entry(stage)?;
        docs = match name {
            "$match" => {
                let filter = as_object(name, spec)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$project" => {
                let spec = as_object(name, spec)?;
                docs.iter().map(|doc| project(doc, spec)).collect()
            }
            "$sort" => {
                let spec = as_object(name, spec)?;
                sort(&mut docs, spec);
                docs
            }
            "$group" => group(docs, as_object(name, spec)?)?,
            "$skip" => {
                let n = as_count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = as_count(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .ok_or_else(|| NoSqlError::Pipeline("$count expects a field name".to_string()))?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Map::new();
                    out.insert(field.to_string(), Value::from(docs.len() as i64));
                    vec![Value::Object(out)]
                }
            }
            other => return Err(NoSqlError::Pipeline(format!("unsupported stage {}", other))),
        };
    }
    Ok(docs)
}

fn single_entry(stage: &Value) -> Result<(&str, &Value)> {
    match stage {
        Value::Object(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| NoSqlError::Pipeline("empty stage".to_string())),
        _ => Err(NoSqlError::Pipeline(format!("malformed stage {}", stage))),
    }
}

fn as_object<'a>(stage: &str, spec: &'a Value) -> Result<&'a Map<String, Value>> {
    spec.as_object()
        .ok_or_else(|| NoSqlError::Pipeline(format!("{} expects an object", stage)))
}

fn as_count(stage: &str, spec: &Value) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| NoSqlError::Pipeline(format!("{} expects a non-negative integer", stage)))
}

/// Whether `doc` satisfies a `$match` filter.
pub fn matches(doc: &Value, filter: &Map<String, Value>) -> Result<bool> {
    for (key, cond) in filter {
        let ok = if key == "$or" {
            let branches = cond
                .as_array()
                .ok_or_else(|| NoSqlError::Pipeline("$or expects an array".to_string()))?;
            let mut any = false;
            for branch in branches {
                if matches(doc, as_object("$or", branch)?)? {
                    any = true;
                    break;
                }
            }
            any
        } else if key == "$and" {
            let branches = cond
                .as_array()
                .ok_or_else(|| NoSqlError::Pipeline("$and expects an array".to_string()))?;
            let mut all = true;
            for branch in branches {
                if !matches(doc, as_object("$and", branch)?)? {
                    all = false;
                    break;
                }
            }
            all
        } else {
            field_matches(doc.get(key), cond)?
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn field_matches(actual: Option<&Value>, cond: &Value) -> Result<bool> {
    let ops = match cond {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        _ => return Ok(equals(actual, cond)),
    };
    for (op, expected) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(actual, expected),
            "$ne" => !equals(actual, expected),
            "$lt" => ordered(actual, expected, |o| o == Ordering::Less),
            "$lte" => ordered(actual, expected, |o| o != Ordering::Greater),
            "$gt" => ordered(actual, expected, |o| o == Ordering::Greater),
            "$gte" => ordered(actual, expected, |o| o != Ordering::Less),
            "$in" => list(op, expected)?.iter().any(|v| equals(actual, v)),
            "$nin" => !list(op, expected)?.iter().any(|v| equals(actual, v)),
            "$regex" => match (actual, expected) {
                (Some(Value::String(s)), Value::String(pattern)) => s.contains(pattern.as_str()),
                (Some(Value::String(s)), other) => s.contains(&other.to_string()),
                _ => false,
            },
            other => return Err(NoSqlError::Pipeline(format!("unsupported operator {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list<'a>(op: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| NoSqlError::Pipeline(format!("{} expects an array", op)))
}

/// Equality; a null expectation also matches a missing field.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        (Some(a), b) => compare_values(a, b) == Some(Ordering::Equal) || a == b,
    }
}

fn ordered(actual: Option<&Value>, expected: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|a| compare_values(a, expected))
        .map(pred)
        .unwrap_or(false)
}

/// Compare two JSON values of the same type
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order for sorting: missing/null, numbers, strings, booleans, rest.
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Bool(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn project(doc: &Value, spec: &Map<String, Value>) -> Value {
    let include_id = spec.get("_id").map(truthy).unwrap_or(true);
    let mut out = Map::new();
    if include_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (key, flag) in spec {
        if key == "_id" || !truthy(flag) {
            continue;
        }
        if let Some(v) = doc.get(key) {
            out.insert(key.clone(), v.clone());
        }
    }
    Value::Object(out)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

fn sort(docs: &mut [Value], spec: &Map<String, Value>) {
    let keys: Vec<(&str, bool)> = spec
        .iter()
        .map(|(k, dir)| (k.as_str(), dir.as_i64().unwrap_or(1) < 0))
        .collect();
    docs.sort_by(|a, b| {
        for (key, desc) in &keys {
            let ord = sort_order(a.get(*key), b.get(*key));
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn group(docs: Vec<Value>, spec: &Map<String, Value>) -> Result<Vec<Value>> {
    let id_spec = spec
        .get("_id")
        .ok_or_else(|| NoSqlError::Pipeline("$group requires _id".to_string()))?;

    let mut buckets: Vec<(Value, Vec<Value>)> = Vec::new();
    for doc in docs {
        let key = match id_spec.as_str().and_then(|s| s.strip_prefix('$')) {
            Some(path) => doc.get(path).cloned().unwrap_or(Value::Null),
            None => id_spec.clone(),
        };
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(doc),
            None => buckets.push((key, vec![doc])),
        }
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (key, members) in buckets {
        let mut row = Map::new();
        row.insert("_id".to_string(), key);
        for (field, acc) in spec {
            if field == "_id" {
                continue;
            }
            let (op, arg) = single_entry(acc)?;
            row.insert(field.clone(), accumulate(op, arg, &members)?);
        }
        out.push(Value::Object(row));
    }
    Ok(out)
}

fn accumulate(op: &str, arg: &Value, members: &[Value]) -> Result<Value> {
    let values: Vec<Value> = members
        .iter()
        .filter_map(|doc| match arg.as_str().and_then(|s| s.strip_prefix('$')) {
            Some(path) => doc.get(path).cloned(),
            None => Some(arg.clone()),
        })
        .filter(|v| !v.is_null())
        .collect();

    Ok(match op {
        "$sum" => sum(&values),
        "$avg" => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Number::from_f64(nums.iter().sum::<f64>() / nums.len() as f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        "$min" => extreme(&values, Ordering::Less),
        "$max" => extreme(&values, Ordering::Greater),
        other => return Err(NoSqlError::Pipeline(format!("unsupported accumulator {}", other))),
    })
}

fn sum(values: &[Value]) -> Value {
    let numbers: Vec<&Number> = values
        .iter()
        .filter_map(|v| match v {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .collect();
    if numbers.iter().all(|n| n.is_i64()) {
        Value::from(numbers.iter().filter_map(|n| n.as_i64()).sum::<i64>())
    } else {
        Number::from_f64(numbers.iter().filter_map(|n| n.as_f64()).sum::<f64>())
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn extreme(values: &[Value], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for v in values {
        best = match best {
            Some(b) if sort_order(Some(v), Some(b)) != want => Some(b),
            _ => Some(v),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
