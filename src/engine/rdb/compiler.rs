//! SQL compilation
//!
//! Pure functions from a `Cnd` and entity metadata to SQL text plus bound
//! parameters. Clause keywords are uppercase; predicate connectives and
//! operators are lowercase.

use chrono::FixedOffset;
use serde_json::Value;

use crate::engine::error::{DbError, Result};
use crate::engine::model::{FieldDef, FieldKind};
use crate::engine::sqlc::{Cnd, Condition, JoinCond, Logic, Operand, SqlValue};
use crate::engine::util::datetime::millis_to_string;

/// Identity column of every relational table.
pub const ID_COLUMN: &str = "id";

/// ` WHERE ...` for the predicates of `cnd`, or an empty string.
pub fn where_clause(cnd: &Cnd, params: &mut Vec<SqlValue>) -> Result<String> {
    let parts = predicates(&cnd.conditions, params)?;
    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(" and ")))
    }
}

fn predicates(conditions: &[Condition], params: &mut Vec<SqlValue>) -> Result<Vec<String>> {
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
        if let Some(part) = predicate(condition, params)? {
            parts.push(part);
        }
    }
    Ok(parts)
}

fn predicate(c: &Condition, params: &mut Vec<SqlValue>) -> Result<Option<String>> {
    let key = c.key.as_str();
    let sql = match (c.logic, &c.operand) {
        (Logic::Eq, Operand::One(v)) => bind_one(format!("{} = ?", key), v, params),
        (Logic::NotEq, Operand::One(v)) => bind_one(format!("{} <> ?", key), v, params),
        (Logic::Lt, Operand::One(v)) => bind_one(format!("{} < ?", key), v, params),
        (Logic::Lte, Operand::One(v)) => bind_one(format!("{} <= ?", key), v, params),
        (Logic::Gt, Operand::One(v)) => bind_one(format!("{} > ?", key), v, params),
        (Logic::Gte, Operand::One(v)) => bind_one(format!("{} >= ?", key), v, params),
        (Logic::IsNull, _) => format!("{} is null", key),
        (Logic::IsNotNull, _) => format!("{} is not null", key),
        (Logic::Between, Operand::Range(lo, hi)) => {
            params.push(lo.clone());
            params.push(hi.clone());
            format!("{} between ? and ?", key)
        }
        (Logic::NotBetween, Operand::Range(lo, hi)) => {
            params.push(lo.clone());
            params.push(hi.clone());
            format!("{} not between ? and ?", key)
        }
        (Logic::In, Operand::Many(values)) => bind_many(key, "in", values, params)?,
        (Logic::NotIn, Operand::Many(values)) => bind_many(key, "not in", values, params)?,
        (Logic::Like, Operand::One(v)) => {
            bind_one(format!("{} like concat('%',?,'%')", key), v, params)
        }
        (Logic::NotLike, Operand::One(v)) => {
            bind_one(format!("{} not like concat('%',?,'%')", key), v, params)
        }
        (Logic::Or, Operand::Group(group)) => {
            let mut branches = Vec::with_capacity(group.len());
            for sub in group {
                let parts = predicates(&sub.conditions, params)?;
                match parts.len() {
                    0 => {}
                    1 => branches.extend(parts),
                    _ => branches.push(format!("({})", parts.join(" and "))),
                }
            }
            if branches.is_empty() {
                return Ok(None);
            }
            format!("({})", branches.join(" or "))
        }
        (logic, operand) => {
            return Err(DbError::Compile(format!(
                "condition {:?} on '{}' cannot take operand {:?}",
                logic, key, operand
            )))
        }
    };
    Ok(Some(sql))
}

fn bind_one(sql: String, value: &SqlValue, params: &mut Vec<SqlValue>) -> String {
    params.push(value.clone());
    sql
}

fn bind_many(key: &str, op: &str, values: &[SqlValue], params: &mut Vec<SqlValue>) -> Result<String> {
    if values.is_empty() {
        return Err(DbError::Compile(format!("'{} {}' needs at least one value", key, op)));
    }
    params.extend(values.iter().cloned());
    Ok(format!("{} {}({})", key, op, placeholders(values.len())))
}

pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// ` GROUP BY a, b`, or an empty string.
pub fn group_by(cnd: &Cnd) -> String {
    if cnd.groupbys.is_empty() {
        String::new()
    } else {
        format!(" GROUP BY {}", cnd.groupbys.join(", "))
    }
}

/// ` ORDER BY a desc, b asc`, or an empty string.
pub fn order_by(cnd: &Cnd) -> String {
    let parts: Vec<String> = cnd
        .orderbys
        .iter()
        .map(|o| {
            let dir = if o.logic == Logic::Desc { "desc" } else { "asc" };
            format!("{} {}", o.key, dir)
        })
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", parts.join(", "))
    }
}

/// `FROM table [alias]` followed by every join clause.
pub fn from_clause(cnd: &Cnd) -> String {
    let mut sql = format!(" FROM {}", cnd.from.table);
    if !cnd.from.alias.is_empty() {
        sql.push(' ');
        sql.push_str(&cnd.from.alias);
    }
    for join in &cnd.joins {
        if let Some(clause) = join_clause(join) {
            sql.push_str(&clause);
        }
    }
    sql
}

fn join_clause(join: &JoinCond) -> Option<String> {
    let kind = match join.kind {
        Logic::Left => "LEFT JOIN",
        Logic::Right => "RIGHT JOIN",
        Logic::Inner => "INNER JOIN",
        _ => return None,
    };
    if join.alias.is_empty() {
        Some(format!(" {} {} ON {}", kind, join.table, join.on))
    } else {
        Some(format!(" {} {} AS {} ON {}", kind, join.table, join.alias, join.on))
    }
}

pub fn select_sql(columns: &[&str], table: &str) -> String {
    format!("SELECT {} FROM {}", columns.join(", "), table)
}

pub fn insert_sql(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders(columns.len())
    )
}

pub fn update_sql(table: &str, columns: &[&str]) -> String {
    let sets: Vec<String> = columns.iter().map(|c| format!("{} = ?", c)).collect();
    format!("UPDATE {} SET {} WHERE {} = ?", table, sets.join(", "), ID_COLUMN)
}

pub fn delete_sql(table: &str, n: usize) -> String {
    format!("DELETE FROM {} WHERE {} in({})", table, ID_COLUMN, placeholders(n))
}

/// `UPDATE table SET k = ?, ...` over the update pairs of `cnd`, restricted
/// by its predicates.
pub fn update_by_cnd_sql(table: &str, cnd: &Cnd) -> Result<(String, Vec<SqlValue>)> {
    if cnd.update_kv.is_empty() {
        return Err(DbError::Input("update_by_cnd needs update_key_value pairs".to_string()));
    }
    let mut params: Vec<SqlValue> = cnd.update_kv.iter().map(|(_, v)| v.clone()).collect();
    let sets: Vec<String> = cnd.update_kv.iter().map(|(k, _)| format!("{} = ?", k)).collect();
    let where_sql = where_clause(cnd, &mut params)?;
    Ok((format!("UPDATE {} SET {}{}", table, sets.join(", "), where_sql), params))
}

/// Parameter for one entity field, or `None` when the field is skipped.
pub fn field_param(field: &FieldDef, value: Option<&Value>, offset: FixedOffset) -> Result<Option<SqlValue>> {
    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let mismatch = || {
        DbError::Compile(format!(
            "field '{}' declared {:?} but serialized as {}",
            field.name, field.kind, value
        ))
    };

    match field.kind {
        FieldKind::String => value
            .as_str()
            .map(|s| Some(SqlValue::Text(s.to_string())))
            .ok_or_else(mismatch),
        kind if kind.is_integer() => {
            let n = value.as_i64().ok_or_else(mismatch)?;
            if field.date && n > 0 {
                let text = millis_to_string(n, offset).ok_or_else(mismatch)?;
                Ok(Some(SqlValue::Text(text)))
            } else {
                Ok(Some(SqlValue::Integer(n)))
            }
        }
        FieldKind::Slice(_) if value.is_array() => Ok(Some(SqlValue::Text(value.to_string()))),
        FieldKind::Map(_) if value.is_object() => Ok(Some(SqlValue::Text(value.to_string()))),
        FieldKind::Slice(_) | FieldKind::Map(_) => Err(mismatch()),
        _ => {
            tracing::warn!(field = field.name, kind = ?field.kind, "no relational mapping, field skipped");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::ScalarKind;
    use crate::engine::util::datetime::utc;
    use serde_json::json;

    fn compile(cnd: &Cnd) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let sql = where_clause(cnd, &mut params).unwrap();
        (sql, params)
    }

    #[test]
    fn test_each_logic() {
        let cases: Vec<(Cnd, &str, usize)> = vec![
            (Cnd::new().eq("a", 1i64), " WHERE a = ?", 1),
            (Cnd::new().not_eq("a", 1i64), " WHERE a <> ?", 1),
            (Cnd::new().lt("a", 1i64), " WHERE a < ?", 1),
            (Cnd::new().lte("a", 1i64), " WHERE a <= ?", 1),
            (Cnd::new().gt("a", 1i64), " WHERE a > ?", 1),
            (Cnd::new().gte("a", 1i64), " WHERE a >= ?", 1),
            (Cnd::new().is_null("a"), " WHERE a is null", 0),
            (Cnd::new().is_not_null("a"), " WHERE a is not null", 0),
            (Cnd::new().between("a", 1i64, 2i64), " WHERE a between ? and ?", 2),
            (Cnd::new().not_between("a", 1i64, 2i64), " WHERE a not between ? and ?", 2),
            (Cnd::new().is_in("a", [1i64, 2, 3]), " WHERE a in(?, ?, ?)", 3),
            (Cnd::new().not_in("a", [1i64]), " WHERE a not in(?)", 1),
            (Cnd::new().like("a", "x"), " WHERE a like concat('%',?,'%')", 1),
            (Cnd::new().not_like("a", "x"), " WHERE a not like concat('%',?,'%')", 1),
        ];
        for (cnd, want, n) in cases {
            let (sql, params) = compile(&cnd);
            assert_eq!(sql, want);
            assert_eq!(params.len(), n, "{}", want);
        }
    }

    #[test]
    fn test_and_or_ordering() {
        let cnd = Cnd::new()
            .eq("status", 1i64)
            .or([
                Cnd::new().eq("name", "x"),
                Cnd::new().gt("age", 5i64).lt("age", 9i64),
            ])
            .is_not_null("email");
        let (sql, params) = compile(&cnd);
        assert_eq!(
            sql,
            " WHERE status = ? and (name = ? or (age > ? and age < ?)) and email is not null"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Integer(1),
                SqlValue::Text("x".into()),
                SqlValue::Integer(5),
                SqlValue::Integer(9),
            ]
        );
    }

    #[test]
    fn test_or_of_empty_groups_is_dropped() {
        let (sql, params) = compile(&Cnd::new().or([Cnd::new()]));
        assert_eq!(sql, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_in_rejected() {
        let mut params = Vec::new();
        let cnd = Cnd::new().is_in("a", Vec::<i64>::new());
        assert!(matches!(where_clause(&cnd, &mut params), Err(DbError::Compile(_))));
    }

    #[test]
    fn test_order_group_from() {
        let cnd = Cnd::new()
            .groupby(["a", "b"])
            .desc("a")
            .asc("b")
            .from_as("user", "u")
            .join(Logic::Left, "orders o", "o.uid = u.id")
            .join_as(Logic::Inner, "shop", "s", "s.id = o.sid");
        assert_eq!(group_by(&cnd), " GROUP BY a, b");
        assert_eq!(order_by(&cnd), " ORDER BY a desc, b asc");
        assert_eq!(
            from_clause(&cnd),
            " FROM user u LEFT JOIN orders o ON o.uid = u.id INNER JOIN shop AS s ON s.id = o.sid"
        );
        assert_eq!(order_by(&Cnd::new()), "");
    }

    #[test]
    fn test_statement_shapes() {
        assert_eq!(
            insert_sql("user", &["id", "name"]),
            "INSERT INTO user (id, name) VALUES (?, ?)"
        );
        assert_eq!(
            update_sql("user", &["name", "age"]),
            "UPDATE user SET name = ?, age = ? WHERE id = ?"
        );
        assert_eq!(delete_sql("user", 2), "DELETE FROM user WHERE id in(?, ?)");

        let cnd = Cnd::new()
            .eq("state", 1i64)
            .update_key_value(["state"], [2i64]);
        let (sql, params) = update_by_cnd_sql("user", &cnd).unwrap();
        assert_eq!(sql, "UPDATE user SET state = ? WHERE state = ?");
        assert_eq!(params, vec![SqlValue::Integer(2), SqlValue::Integer(1)]);
        assert!(update_by_cnd_sql("user", &Cnd::new()).is_err());
    }

    #[test]
    fn test_field_param_conversion() {
        let offset = utc();
        let name = FieldDef::string("name");
        assert_eq!(
            field_param(&name, Some(&json!("x")), offset).unwrap(),
            Some(SqlValue::Text("x".into()))
        );
        assert!(field_param(&name, Some(&json!(1)), offset).is_err());
        assert_eq!(field_param(&name, None, offset).unwrap(), None);

        let ctime = FieldDef::int64("ctime").date();
        assert_eq!(
            field_param(&ctime, Some(&json!(1_700_000_000_123i64)), offset).unwrap(),
            Some(SqlValue::Text("2023-11-14 22:13:20".into()))
        );
        assert_eq!(
            field_param(&ctime, Some(&json!(0)), offset).unwrap(),
            Some(SqlValue::Integer(0))
        );

        let tags = FieldDef::slice("tags", ScalarKind::String);
        assert_eq!(
            field_param(&tags, Some(&json!(["a"])), offset).unwrap(),
            Some(SqlValue::Text(r#"["a"]"#.into()))
        );
        assert_eq!(field_param(&tags, Some(&Value::Null), offset).unwrap(), None);

        let flag = FieldDef::boolean("flag");
        assert_eq!(field_param(&flag, Some(&json!(true)), offset).unwrap(), None);
    }
}
