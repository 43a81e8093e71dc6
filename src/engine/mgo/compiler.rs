//! Pipeline compilation
//!
//! Builds aggregation stages from a `Cnd` in a fixed order: `$match`,
//! `$project`, `$sort`, `$group`, then `$count` or `$skip`/`$limit`.

use serde_json::{json, Map, Value};

use crate::engine::error::{DbError, Result};
use crate::engine::model::EntityMeta;
use crate::engine::sqlc::{Cnd, Condition, Logic, Operand, SqlValue};

pub const COUNT_BY: &str = "COUNT_BY";

/// Document key for a condition key; the entity identity maps to `_id`.
pub fn doc_key<'a>(id_field: &str, key: &'a str) -> &'a str {
    if key == id_field || key == "_id" {
        "_id"
    } else {
        key
    }
}

/// Stages for a read (`counting == false`) or a count.
pub fn pipeline(cnd: &Cnd, meta: &EntityMeta, counting: bool) -> Result<Vec<Value>> {
    let id = meta.id_field;
    let mut stages = Vec::new();

    let filter = match_filter(cnd, id)?;
    if !filter.is_empty() {
        stages.push(json!({ "$match": filter }));
    }

    if !cnd.fields.is_empty() {
        let project: Map<String, Value> = cnd
            .fields
            .iter()
            .map(|f| (doc_key(id, f).to_string(), json!(1)))
            .collect();
        stages.push(json!({ "$project": project }));
    }

    if !cnd.orderbys.is_empty() {
        let sort: Map<String, Value> = cnd
            .orderbys
            .iter()
            .map(|o| {
                let dir = if o.logic == Logic::Desc { -1 } else { 1 };
                (doc_key(id, &o.key).to_string(), json!(dir))
            })
            .collect();
        stages.push(json!({ "$sort": sort }));
    }

    if !cnd.aggregates.is_empty() {
        let mut group = Map::new();
        group.insert("_id".to_string(), json!(0));
        for agg in &cnd.aggregates {
            let op = match agg.logic {
                Logic::Sum => "$sum",
                Logic::Max => "$max",
                Logic::Min => "$min",
                Logic::Avg => "$avg",
                _ => continue,
            };
            let source = doc_key(id, &agg.key);
            let target = if source == "_id" { id } else { source };
            group.insert(target.to_string(), json!({ op: format!("${}", source) }));
        }
        stages.push(json!({ "$group": group }));
    }

    if counting {
        stages.push(json!({ "$count": COUNT_BY }));
    } else if cnd.pagination.is_set() {
        stages.push(json!({ "$skip": cnd.pagination.skip() }));
        stages.push(json!({ "$limit": cnd.pagination.page_size }));
    }

    Ok(stages)
}

/// `$match` document for the predicates of `cnd`.
pub fn match_filter(cnd: &Cnd, id_field: &str) -> Result<Map<String, Value>> {
    let mut filter = Map::new();
    for condition in &cnd.conditions {
        add_condition(&mut filter, condition, id_field)?;
    }
    Ok(filter)
}

fn add_condition(filter: &mut Map<String, Value>, c: &Condition, id: &str) -> Result<()> {
    let key = doc_key(id, &c.key);
    let clause = match (c.logic, &c.operand) {
        (Logic::Eq, Operand::One(v)) => v.to_json(),
        (Logic::NotEq, Operand::One(v)) => op("$ne", v.to_json()),
        (Logic::Lt, Operand::One(v)) => op("$lt", v.to_json()),
        (Logic::Lte, Operand::One(v)) => op("$lte", v.to_json()),
        (Logic::Gt, Operand::One(v)) => op("$gt", v.to_json()),
        (Logic::Gte, Operand::One(v)) => op("$gte", v.to_json()),
        (Logic::IsNull, _) => Value::Null,
        (Logic::IsNotNull, _) => op("$ne", Value::Null),
        (Logic::Between, Operand::Range(lo, hi)) => json!({ "$gte": lo.to_json(), "$lte": hi.to_json() }),
        (Logic::In, Operand::Many(values)) => op("$in", list(values)),
        (Logic::NotIn, Operand::Many(values)) => op("$nin", list(values)),
        (Logic::Like, Operand::One(v)) => op("$regex", v.to_json()),
        (Logic::NotBetween, _) | (Logic::NotLike, _) => {
            tracing::debug!(target: "jorm::mgo", key, logic = ?c.logic, "no document equivalent, condition dropped");
            return Ok(());
        }
        (Logic::Or, Operand::Group(group)) => {
            let branches: Vec<Value> = group
                .iter()
                .map(|sub| match_filter(sub, id).map(Value::Object))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|b| b.as_object().map(|m| !m.is_empty()).unwrap_or(false))
                .collect();
            if !branches.is_empty() {
                add_or(filter, branches);
            }
            return Ok(());
        }
        (logic, operand) => {
            return Err(DbError::Compile(format!(
                "condition {:?} on '{}' cannot take operand {:?}",
                logic, c.key, operand
            )))
        }
    };
    merge_clause(filter, key, clause);
    Ok(())
}

fn op(name: &str, value: Value) -> Value {
    let mut m = Map::new();
    m.insert(name.to_string(), value);
    Value::Object(m)
}

fn list(values: &[SqlValue]) -> Value {
    Value::Array(values.iter().map(SqlValue::to_json).collect())
}

fn is_operator_object(v: &Value) -> bool {
    matches!(v, Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

/// Combine clauses on one key: operator objects merge (a plain value becomes
/// `$eq`); otherwise the later clause wins.
fn merge_clause(filter: &mut Map<String, Value>, key: &str, clause: Value) {
    let merged = match filter.remove(key) {
        Some(existing) if is_operator_object(&existing) || is_operator_object(&clause) => {
            let mut ops = into_ops(existing);
            for (k, v) in into_ops(clause) {
                ops.insert(k, v);
            }
            Value::Object(ops)
        }
        _ => clause,
    };
    filter.insert(key.to_string(), merged);
}

fn into_ops(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) if m.keys().all(|k| k.starts_with('$')) && !m.is_empty() => m,
        other => {
            let mut m = Map::new();
            m.insert("$eq".to_string(), other);
            m
        }
    }
}

/// A second or-group is conjoined with the first through `$and`.
fn add_or(filter: &mut Map<String, Value>, branches: Vec<Value>) {
    let group = json!({ "$or": branches });
    match filter.remove("$or") {
        None => match filter.get_mut("$and") {
            Some(Value::Array(all)) => all.push(group),
            _ => {
                filter.insert("$or".to_string(), group["$or"].clone());
            }
        },
        Some(first) => {
            filter.insert("$and".to_string(), json!([{ "$or": first }, group]));
        }
    }
}

/// Count carried by a `$count` result; no documents is zero.
pub fn count_from(docs: &[Value]) -> i64 {
    docs.first()
        .and_then(|d| d.get(COUNT_BY))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// `$set` document for the update pairs of `cnd`; the identity is never set.
pub fn update_set(cnd: &Cnd, id_field: &str) -> Result<Map<String, Value>> {
    if cnd.update_kv.is_empty() {
        return Err(DbError::Input("update_by_cnd needs update_key_value pairs".to_string()));
    }
    Ok(cnd
        .update_kv
        .iter()
        .filter(|(k, _)| doc_key(id_field, k) != "_id")
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{FieldDef, FieldKind};

    fn meta() -> EntityMeta {
        EntityMeta {
            type_name: "User",
            table: "user",
            id_field: "id",
            mirror: false,
            fields: vec![FieldDef::string("name"), FieldDef::new("age", FieldKind::Int32)],
        }
    }

    #[test]
    fn test_match_mapping() {
        let cnd = Cnd::new()
            .eq("name", "ann")
            .not_eq("state", 2i64)
            .is_null("deleted")
            .is_not_null("email")
            .between("age", 18i64, 30i64)
            .is_in("id", [1i64, 2])
            .not_in("tag", ["x"])
            .like("bio", "rust")
            .not_between("score", 1i64, 2i64)
            .not_like("bio", "go");
        let filter = match_filter(&cnd, "id").unwrap();
        assert_eq!(
            Value::Object(filter),
            json!({
                "name": "ann",
                "state": {"$ne": 2},
                "deleted": null,
                "email": {"$ne": null},
                "age": {"$gte": 18, "$lte": 30},
                "_id": {"$in": [1, 2]},
                "tag": {"$nin": ["x"]},
                "bio": {"$regex": "rust"}
            })
        );
    }

    #[test]
    fn test_same_key_operators_merge() {
        let cnd = Cnd::new().gte("age", 18i64).lt("age", 65i64).eq("age", 30i64);
        let filter = match_filter(&cnd, "id").unwrap();
        assert_eq!(
            filter["age"],
            json!({"$gte": 18, "$lt": 65, "$eq": 30})
        );
    }

    #[test]
    fn test_or_groups() {
        let cnd = Cnd::new()
            .eq("a", 1i64)
            .or([Cnd::new().eq("b", 1i64), Cnd::new().gt("c", 2i64)]);
        assert_eq!(
            Value::Object(match_filter(&cnd, "id").unwrap()),
            json!({"a": 1, "$or": [{"b": 1}, {"c": {"$gt": 2}}]})
        );

        let twice = cnd.or([Cnd::new().eq("d", 1i64), Cnd::new().eq("e", 1i64)]);
        assert_eq!(
            Value::Object(match_filter(&twice, "id").unwrap()),
            json!({"a": 1, "$and": [
                {"$or": [{"b": 1}, {"c": {"$gt": 2}}]},
                {"$or": [{"d": 1}, {"e": 1}]}
            ]})
        );
    }

    #[test]
    fn test_stage_order() {
        let cnd = Cnd::new()
            .eq("name", "ann")
            .fields(["id", "name"])
            .desc("age")
            .asc("id")
            .aggregate(Logic::Sum, "age")
            .aggregate(Logic::Max, "id")
            .limit(2, 10);
        let stages = pipeline(&cnd, &meta(), false).unwrap();
        assert_eq!(
            stages,
            vec![
                json!({"$match": {"name": "ann"}}),
                json!({"$project": {"_id": 1, "name": 1}}),
                json!({"$sort": {"age": -1, "_id": 1}}),
                json!({"$group": {"_id": 0, "age": {"$sum": "$age"}, "id": {"$max": "$_id"}}}),
                json!({"$skip": 10}),
                json!({"$limit": 10}),
            ]
        );
        let keys: Vec<String> = stages[2]["$sort"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["age", "_id"]);
    }

    #[test]
    fn test_count_pipeline_has_no_window() {
        let cnd = Cnd::new().eq("name", "ann").limit(3, 5);
        let stages = pipeline(&cnd, &meta(), true).unwrap();
        assert_eq!(
            stages,
            vec![json!({"$match": {"name": "ann"}}), json!({"$count": COUNT_BY})]
        );
        assert_eq!(count_from(&[json!({"COUNT_BY": 4})]), 4);
        assert_eq!(count_from(&[]), 0);
    }

    #[test]
    fn test_offset_window() {
        let cnd = Cnd::new().offset(7, 3);
        let stages = pipeline(&cnd, &meta(), false).unwrap();
        assert_eq!(stages, vec![json!({"$skip": 7}), json!({"$limit": 3})]);
    }

    #[test]
    fn test_update_set() {
        let cnd = Cnd::new().update_key_value(["id", "name"], [SqlValue::from(9i64), SqlValue::from("x")]);
        assert_eq!(Value::Object(update_set(&cnd, "id").unwrap()), json!({"name": "x"}));
        assert!(update_set(&Cnd::new(), "id").is_err());
    }
}
