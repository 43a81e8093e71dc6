//! Condition model
//!
//! `Cnd` is a backend-neutral description of one query: predicates, or-groups,
//! projection, grouping, ordering, aggregates, joins, pagination, update
//! pairs and a cache directive. The relational engine compiles it to SQL, the
//! document engine to an aggregation pipeline.

use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::sync::Arc;

use super::value::SqlValue;
use crate::engine::model::{resolve, Entity, EntityMeta, MetaError};

pub const MAX_PAGE_SIZE: i64 = 5000;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Operator, ordering, join and aggregate markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
    In,
    NotIn,
    Like,
    NotLike,
    Or,
    Asc,
    Desc,
    Left,
    Right,
    Inner,
    Sum,
    Avg,
    Min,
    Max,
}

impl Logic {
    pub fn is_join(&self) -> bool {
        matches!(self, Logic::Left | Logic::Right | Logic::Inner)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Logic::Sum | Logic::Avg | Logic::Min | Logic::Max)
    }
}

/// Operand of a condition. Each logic carries exactly the shape it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    One(SqlValue),
    Range(SqlValue, SqlValue),
    Many(Vec<SqlValue>),
    Group(Vec<Cnd>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub logic: Logic,
    pub key: String,
    pub operand: Operand,
}

impl Condition {
    fn new(logic: Logic, key: &str, operand: Operand) -> Self {
        Self {
            logic,
            key: key.to_string(),
            operand,
        }
    }
}

/// Page window plus the totals an engine writes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, or the raw offset in offset mode
    pub page_no: i64,
    pub page_size: i64,
    pub page_total: i64,
    pub page_count: i64,
    pub spilled: bool,
    pub is_offset: bool,
}

impl Pagination {
    /// Page-number mode with clamping.
    pub fn page(page_no: i64, page_size: i64) -> Self {
        Self {
            page_no: if page_no <= 0 { 1 } else { page_no },
            page_size: clamp_size(page_size),
            ..Self::default()
        }
    }

    /// Offset mode with clamping; no total is computed.
    pub fn offset(offset: i64, limit: i64) -> Self {
        Self {
            page_no: offset.max(0),
            page_size: clamp_size(limit),
            is_offset: true,
            ..Self::default()
        }
    }

    pub fn is_set(&self) -> bool {
        self.page_no != 0 || self.page_size != 0
    }

    /// Row offset of the window, saturating at `i64::MAX`.
    pub fn skip(&self) -> i64 {
        if self.is_offset {
            self.page_no
        } else {
            self.page_no
                .saturating_sub(1)
                .max(0)
                .saturating_mul(self.page_size)
        }
    }

    /// Record the total and derive the page count.
    pub fn apply_total(&mut self, total: i64) {
        self.page_total = total;
        self.page_count = if total > 0 && self.page_size > 0 {
            (total - 1) / self.page_size + 1
        } else {
            0
        };
    }
}

fn clamp_size(size: i64) -> i64 {
    if size <= 0 || size > MAX_PAGE_SIZE {
        DEFAULT_PAGE_SIZE
    } else {
        size
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromCond {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCond {
    pub kind: Logic,
    pub table: String,
    pub alias: String,
    pub on: String,
}

/// Cache directive for document reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub open: bool,
    pub prefix: String,
    pub key: String,
    /// Seconds; zero or less uses the cache default
    pub expire: i64,
}

impl CacheConfig {
    pub fn new(key: &str, expire: i64) -> Self {
        Self {
            open: true,
            prefix: String::new(),
            key: key.to_string(),
            expire,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn is_active(&self) -> bool {
        self.open && !self.key.is_empty()
    }

    pub fn full_key(&self) -> String {
        format!("{}{}", self.prefix, self.key)
    }
}

/// Entity type a condition model targets.
#[derive(Clone, Copy)]
pub struct ModelRef {
    pub type_id: TypeId,
    pub type_name: &'static str,
    resolver: fn() -> Result<Arc<EntityMeta>, MetaError>,
}

impl ModelRef {
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            resolver: resolve::<E>,
        }
    }

    pub fn meta(&self) -> Result<Arc<EntityMeta>, MetaError> {
        (self.resolver)()
    }

    pub fn is<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }
}

impl std::fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelRef").field(&self.type_name).finish()
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

/// Condition model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cnd {
    pub model: Option<ModelRef>,
    pub conditions: Vec<Condition>,
    pub fields: Vec<String>,
    pub distincts: Vec<String>,
    pub groupbys: Vec<String>,
    pub orderbys: Vec<Condition>,
    pub aggregates: Vec<Condition>,
    pub update_kv: Vec<(String, SqlValue)>,
    pub pagination: Pagination,
    pub from: FromCond,
    pub joins: Vec<JoinCond>,
    pub cache: CacheConfig,
}

impl Cnd {
    /// Condition model without a target entity, for or-groups and
    /// `find_complex` queries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition model targeting `E`.
    pub fn of<E: Entity>() -> Self {
        Self {
            model: Some(ModelRef::of::<E>()),
            ..Self::default()
        }
    }

    fn push(mut self, logic: Logic, key: &str, operand: Operand) -> Self {
        self.conditions.push(Condition::new(logic, key, operand));
        self
    }

    pub fn eq(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Eq, key, Operand::One(value.into()))
    }

    pub fn not_eq(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::NotEq, key, Operand::One(value.into()))
    }

    pub fn lt(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Lt, key, Operand::One(value.into()))
    }

    pub fn lte(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Lte, key, Operand::One(value.into()))
    }

    pub fn gt(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Gt, key, Operand::One(value.into()))
    }

    pub fn gte(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Gte, key, Operand::One(value.into()))
    }

    pub fn is_null(self, key: &str) -> Self {
        self.push(Logic::IsNull, key, Operand::None)
    }

    pub fn is_not_null(self, key: &str) -> Self {
        self.push(Logic::IsNotNull, key, Operand::None)
    }

    pub fn between(self, key: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Self {
        self.push(Logic::Between, key, Operand::Range(low.into(), high.into()))
    }

    pub fn not_between(
        self,
        key: &str,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        self.push(Logic::NotBetween, key, Operand::Range(low.into(), high.into()))
    }

    pub fn is_in<V: Into<SqlValue>>(self, key: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Logic::In, key, Operand::Many(values))
    }

    pub fn not_in<V: Into<SqlValue>>(self, key: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Logic::NotIn, key, Operand::Many(values))
    }

    /// Substring match.
    pub fn like(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::Like, key, Operand::One(value.into()))
    }

    pub fn not_like(self, key: &str, value: impl Into<SqlValue>) -> Self {
        self.push(Logic::NotLike, key, Operand::One(value.into()))
    }

    /// Disjunction of nested condition models; only their predicates count.
    pub fn or(self, group: impl IntoIterator<Item = Cnd>) -> Self {
        self.push(Logic::Or, "", Operand::Group(group.into_iter().collect()))
    }

    pub fn from(mut self, table: &str) -> Self {
        self.from = FromCond {
            table: table.to_string(),
            alias: String::new(),
        };
        self
    }

    pub fn from_as(mut self, table: &str, alias: &str) -> Self {
        self.from = FromCond {
            table: table.to_string(),
            alias: alias.to_string(),
        };
        self
    }

    /// Add a join. Ignored when `table` or `on` is empty.
    pub fn join(self, kind: Logic, table: &str, on: &str) -> Self {
        self.join_as(kind, table, "", on)
    }

    pub fn join_as(mut self, kind: Logic, table: &str, alias: &str, on: &str) -> Self {
        if table.is_empty() || on.is_empty() {
            return self;
        }
        self.joins.push(JoinCond {
            kind,
            table: table.to_string(),
            alias: alias.to_string(),
            on: on.to_string(),
        });
        self
    }

    pub fn limit(mut self, page_no: i64, page_size: i64) -> Self {
        self.pagination = Pagination::page(page_no, page_size);
        self
    }

    pub fn offset(mut self, offset: i64, limit: i64) -> Self {
        self.pagination = Pagination::offset(offset, limit);
        self
    }

    pub fn distinct<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.distincts.extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }

    pub fn groupby<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.groupbys.extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }

    /// Order by `key`; `dir` is `Logic::Asc` or `Logic::Desc`.
    pub fn orderby(mut self, key: &str, dir: Logic) -> Self {
        self.orderbys.push(Condition::new(dir, key, Operand::None));
        self
    }

    pub fn asc(self, key: &str) -> Self {
        self.orderby(key, Logic::Asc)
    }

    pub fn desc(self, key: &str) -> Self {
        self.orderby(key, Logic::Desc)
    }

    /// Projection (`AnyFields`).
    pub fn fields<S: AsRef<str>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.fields.extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }

    /// Attach a cache directive; attaching always opens it.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = CacheConfig { open: true, ..cache };
        self
    }

    /// Pairwise update assignments. Mismatched lengths leave the model
    /// unchanged.
    pub fn update_key_value<S: AsRef<str>, V: Into<SqlValue>>(
        mut self,
        keys: impl IntoIterator<Item = S>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();
        if keys.len() != values.len() {
            tracing::warn!(
                keys = keys.len(),
                values = values.len(),
                "update_key_value: key and value counts differ, ignored"
            );
            return self;
        }
        for (key, value) in keys.into_iter().zip(values) {
            match self.update_kv.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => self.update_kv.push((key, value)),
            }
        }
        self
    }

    /// Aggregate `key` with `logic` (`Sum`, `Avg`, `Min`, `Max`).
    pub fn aggregate(mut self, logic: Logic, key: &str) -> Self {
        self.aggregates.push(Condition::new(logic, key, Operand::None));
        self
    }

    pub fn model_meta(&self) -> Option<Result<Arc<EntityMeta>, MetaError>> {
        self.model.as_ref().map(ModelRef::meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamps() {
        let cnd = Cnd::new().limit(0, 0);
        assert_eq!(cnd.pagination, Pagination::page(1, 10));
        assert_eq!(cnd.pagination.page_no, 1);
        assert_eq!(cnd.pagination.page_size, 10);

        let cnd = Cnd::new().limit(3, 6000);
        assert_eq!(cnd.pagination.page_size, 10);
        assert_eq!(Cnd::new().limit(2, 5000).pagination.page_size, 5000);
    }

    #[test]
    fn test_offset_clamps() {
        let p = Cnd::new().offset(-5, -1).pagination;
        assert_eq!(p.page_no, 0);
        assert_eq!(p.page_size, 10);
        assert!(p.is_offset);
        assert_eq!(p.skip(), 0);

        let p = Pagination::offset(40, 20);
        assert_eq!(p.skip(), 40);
    }

    #[test]
    fn test_page_skip() {
        assert_eq!(Pagination::page(3, 10).skip(), 20);
        assert!(!Pagination::default().is_set());
    }

    #[test]
    fn test_huge_page_number_saturates() {
        assert_eq!(Pagination::page(i64::MAX / 2, 5000).skip(), i64::MAX);
        assert_eq!(Pagination::page(i64::MAX, 10).skip(), i64::MAX);

        let mut p = Pagination::page(1, 10);
        p.apply_total(i64::MAX);
        assert_eq!(p.page_count, (i64::MAX - 1) / 10 + 1);
    }

    #[test]
    fn test_apply_total() {
        let mut p = Pagination::page(1, 10);
        p.apply_total(25);
        assert_eq!(p.page_total, 25);
        assert_eq!(p.page_count, 3);

        p.apply_total(0);
        assert_eq!(p.page_count, 0);

        let mut p = Pagination::page(1, 5);
        p.apply_total(10);
        assert_eq!(p.page_count, 2);
    }

    #[test]
    fn test_join_ignored_when_incomplete() {
        let cnd = Cnd::new()
            .join(Logic::Left, "", "a.id = b.aid")
            .join(Logic::Left, "b", "")
            .join(Logic::Inner, "b", "a.id = b.aid");
        assert_eq!(cnd.joins.len(), 1);
        assert_eq!(cnd.joins[0].kind, Logic::Inner);
        assert!(cnd.joins[0].alias.is_empty());

        let aliased = Cnd::new().join_as(Logic::Left, "pet", "t", "t.owner_id = p.id");
        assert_eq!(aliased.joins[0].alias, "t");
    }

    #[test]
    fn test_cache_directive_is_opened() {
        let closed = CacheConfig {
            open: false,
            ..CacheConfig::new("k", 5)
        };
        let cnd = Cnd::new().cache(closed);
        assert!(cnd.cache.open);
        assert!(cnd.cache.is_active());
    }

    #[test]
    fn test_update_key_value_mismatch() {
        let cnd = Cnd::new().update_key_value(["a", "b"], [1i64]);
        assert!(cnd.update_kv.is_empty());

        let cnd = Cnd::new()
            .update_key_value(["a", "b"], [1i64, 2])
            .update_key_value(["a"], [3i64]);
        assert_eq!(
            cnd.update_kv,
            vec![
                ("a".to_string(), SqlValue::Integer(3)),
                ("b".to_string(), SqlValue::Integer(2)),
            ]
        );
    }

    #[test]
    fn test_condition_order_preserved() {
        let cnd = Cnd::new()
            .eq("a", 1i64)
            .between("b", 1i64, 9i64)
            .is_in("c", ["x", "y"])
            .or([Cnd::new().eq("d", 1i64), Cnd::new().eq("e", 2i64)]);
        let logics: Vec<Logic> = cnd.conditions.iter().map(|c| c.logic).collect();
        assert_eq!(logics, vec![Logic::Eq, Logic::Between, Logic::In, Logic::Or]);
        match &cnd.conditions[3].operand {
            Operand::Group(group) => assert_eq!(group.len(), 2),
            other => panic!("unexpected operand {:?}", other),
        }
    }

    #[test]
    fn test_cache_key() {
        let cache = CacheConfig::new("list", 30).with_prefix("user:");
        assert!(cache.is_active());
        assert_eq!(cache.full_key(), "user:list");
        assert!(!CacheConfig::default().is_active());
    }
}
