//! Relational unit of work
//!
//! A session optionally holds one transaction for its whole life. Every
//! failed operation is recorded; `close` commits when the record is clean and
//! rolls back otherwise, then mirrors queued entities to the document store.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::compiler::{
    delete_sql, field_param, from_clause, group_by, insert_sql, order_by, select_sql,
    update_by_cnd_sql, update_sql, where_clause, ID_COLUMN,
};
use super::decoder::{scalar_count, Binding};
use super::RelationalSource;
use crate::engine::adapter::{
    DialectError, ExecResult, RawRow, RawRows, SqlExecutor, SqliteTx,
};
use crate::engine::error::{DbError, Result};
use crate::engine::hybrid::MirrorQueue;
use crate::engine::mgo::DocumentSource;
use crate::engine::model::{resolve, resolve_record, Entity, EntityMeta, FieldKind, Record};
use crate::engine::registry::Options;
use crate::engine::sqlc::{Cnd, Pagination, SqlValue};
use crate::engine::util::next_id;

pub struct RdbSession {
    source: Arc<RelationalSource>,
    tx: Option<SqliteTx>,
    auto_id: bool,
    node: i64,
    mirror: Option<Arc<DocumentSource>>,
    queue: MirrorQueue,
    errors: Vec<String>,
}

/// Columns selected for an entity and how each decodes.
struct Projection<'m> {
    columns: Vec<&'m str>,
    bindings: Vec<Binding<'m>>,
}

impl RdbSession {
    /// Open a session; `mirror` is the document source cache-sync writes to.
    pub fn open(
        source: Arc<RelationalSource>,
        mirror: Option<Arc<DocumentSource>>,
        options: &Options,
    ) -> Result<Self> {
        let settings = source.settings();
        let auto_id = options.auto_id.unwrap_or(settings.auto_id);
        let node = options.node.unwrap_or(settings.node);
        let cache_sync = options.cache_sync.unwrap_or(settings.cache_sync);

        let mirror = match (cache_sync, mirror) {
            (true, None) => {
                tracing::warn!(
                    ds = source.name(),
                    "cache sync requested but no document source is registered under this name"
                );
                None
            }
            (true, target) => target,
            (false, _) => None,
        };

        let tx = if options.auto_tx {
            Some(source.db().begin()?)
        } else {
            None
        };

        Ok(Self {
            source,
            tx,
            auto_id,
            node,
            mirror,
            queue: MirrorQueue::default(),
            errors: Vec::new(),
        })
    }

    /// Rendered errors recorded so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.errors.push(e.to_string());
        }
        result
    }

    // ========== Execution ==========

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawRows> {
        let start = Instant::now();
        let rows = match &self.tx {
            Some(tx) => tx.query_raw(sql, params),
            None => self.source.db().get_conn()?.query_raw(sql, params),
        };
        self.trace(sql, params, start);
        Ok(rows?)
    }

    fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        let start = Instant::now();
        let res = match &self.tx {
            Some(tx) => tx.execute(sql, params),
            None => {
                let conn = self.source.db().get_conn()?;
                SqlExecutor::execute(&*conn, sql, params)
            }
        };
        self.trace(sql, params, start);
        Ok(res?)
    }

    fn trace(&self, sql: &str, params: &[SqlValue], start: Instant) {
        let cost_ms = start.elapsed().as_millis() as u64;
        let settings = self.source.settings();
        if settings.debug {
            tracing::debug!(target: "jorm::sql", ds = self.source.name(), sql, ?params, cost_ms);
        }
        if settings.slow_query_ms > 0 && cost_ms > settings.slow_query_ms {
            tracing::warn!(target: "jorm::sql", ds = self.source.name(), sql, cost_ms, "slow query");
        }
    }

    // ========== Writes ==========

    /// Insert entities. Identities are generated in auto-id mode, otherwise
    /// adopted from the driver's last insert id.
    pub fn save<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        let result = self.save_inner(entities);
        self.record(result)
    }

    fn save_inner<E: Entity>(&mut self, entities: &mut [E]) -> Result<()> {
        if entities.is_empty() {
            return Err(DbError::Input("save: no entities given".to_string()));
        }
        let meta = resolve::<E>()?;
        let offset = self.source.settings().utc_offset;

        for entity in entities.iter_mut() {
            if self.auto_id {
                entity.set_id(next_id(self.node));
            }
            let body = to_object(&*entity)?;

            let mut columns: Vec<&str> = Vec::new();
            let mut params = Vec::new();
            if entity.id() != 0 {
                columns.push(ID_COLUMN);
                params.push(SqlValue::Integer(entity.id()));
            }
            for field in meta.persisted() {
                if let Some(param) = field_param(field, body.get(field.name), offset)? {
                    columns.push(field.name);
                    params.push(param);
                }
            }
            if columns.is_empty() {
                return Err(DbError::Input(format!("save: {} has nothing to insert", meta.type_name)));
            }

            let res = self.exec(&insert_sql(meta.table, &columns), &params)?;
            if res.affected_rows == 0 {
                return Err(DbError::Data(format!("insert into {} affected no rows", meta.table)));
            }
            if entity.id() == 0 {
                if let Some(id) = res.last_insert_id.filter(|id| *id > 0) {
                    entity.set_id(id);
                }
            }
        }

        self.queue_mirror(&meta, entities)
    }

    /// Update entities by identity. Zero affected rows is not an error.
    pub fn update<E: Entity>(&mut self, entities: &[E]) -> Result<()> {
        let result = self.update_inner(entities);
        self.record(result)
    }

    fn update_inner<E: Entity>(&mut self, entities: &[E]) -> Result<()> {
        if entities.is_empty() {
            return Err(DbError::Input("update: no entities given".to_string()));
        }
        let meta = resolve::<E>()?;
        let offset = self.source.settings().utc_offset;

        for entity in entities {
            let id = entity.id();
            if id == 0 {
                return Err(DbError::Input(format!("update: {} has no identity", meta.type_name)));
            }
            let body = to_object(entity)?;

            let mut columns: Vec<&str> = Vec::new();
            let mut params = Vec::new();
            for field in meta.persisted() {
                if let Some(param) = field_param(field, body.get(field.name), offset)? {
                    columns.push(field.name);
                    params.push(param);
                }
            }
            if columns.is_empty() {
                return Err(DbError::Input(format!("update: {} has nothing to set", meta.type_name)));
            }
            params.push(SqlValue::Integer(id));
            self.exec(&update_sql(meta.table, &columns), &params)?;
        }

        self.queue_mirror(&meta, entities)
    }

    /// Delete entities by identity; returns the affected row count.
    pub fn delete<E: Entity>(&mut self, entities: &[E]) -> Result<u64> {
        let result = self.delete_inner(entities);
        self.record(result)
    }

    fn delete_inner<E: Entity>(&mut self, entities: &[E]) -> Result<u64> {
        if entities.is_empty() {
            return Err(DbError::Input("delete: no entities given".to_string()));
        }
        let meta = resolve::<E>()?;
        let ids: Vec<SqlValue> = entities.iter().map(|e| SqlValue::Integer(e.id())).collect();
        if ids.iter().any(|id| *id == SqlValue::Integer(0)) {
            return Err(DbError::Input(format!("delete: {} has no identity", meta.type_name)));
        }
        let res = self.exec(&delete_sql(meta.table, ids.len()), &ids)?;
        Ok(res.affected_rows)
    }

    /// Apply the update pairs of `cnd` to every matching row.
    pub fn update_by_cnd(&mut self, cnd: &Cnd) -> Result<u64> {
        let result = self.update_by_cnd_inner(cnd);
        self.record(result)
    }

    fn update_by_cnd_inner(&mut self, cnd: &Cnd) -> Result<u64> {
        let meta = model_meta(cnd)?;
        let (sql, params) = update_by_cnd_sql(meta.table, cnd)?;
        Ok(self.exec(&sql, &params)?.affected_rows)
    }

    fn queue_mirror<E: Entity>(&mut self, meta: &EntityMeta, entities: &[E]) -> Result<()> {
        if self.mirror.is_none() || !meta.mirror {
            return Ok(());
        }
        for entity in entities {
            self.queue.push(meta, entity)?;
        }
        Ok(())
    }

    // ========== Reads ==========

    /// Count rows matching `cnd`; writes the total and page count back.
    pub fn count(&mut self, cnd: &mut Cnd) -> Result<i64> {
        let result = self.count_inner(cnd);
        self.record(result)
    }

    fn count_inner(&mut self, cnd: &mut Cnd) -> Result<i64> {
        let meta = model_meta(cnd)?;
        let mut params = Vec::new();
        let sql = format!(
            "SELECT count(1) FROM {}{}",
            meta.table,
            where_clause(cnd, &mut params)?
        );
        let rows = self.query(&sql, &params)?;
        let total = scalar_count(&rows.rows)?;
        cnd.pagination.apply_total(total);
        Ok(total)
    }

    pub fn find_by_id<E: Entity>(&mut self, id: i64) -> Result<Option<E>> {
        let result = self.find_by_id_inner(id);
        self.record(result)
    }

    fn find_by_id_inner<E: Entity>(&mut self, id: i64) -> Result<Option<E>> {
        if id == 0 {
            return Err(DbError::Input("find_by_id: identity must be non-zero".to_string()));
        }
        let meta = resolve::<E>()?;
        let projection = project(&meta, &[])?;
        let sql = format!(
            "{} WHERE {} = ?",
            select_sql(&projection.columns, meta.table),
            ID_COLUMN
        );
        let rows = self.query(&sql, &[SqlValue::Integer(id)])?;
        Ok(self.decode_rows(&projection.bindings, rows.rows)?.into_iter().next())
    }

    /// First row matching `cnd` in its order.
    pub fn find_one<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Option<E>> {
        let result = self.find_one_inner(cnd);
        self.record(result)
    }

    fn find_one_inner<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Option<E>> {
        cnd.pagination = Pagination::offset(0, 1);
        Ok(self.select_entities::<E>(cnd)?.into_iter().next())
    }

    /// Rows matching `cnd`, ordered and paged. In page-number mode the total
    /// and page count are written back first.
    pub fn find_list<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Vec<E>> {
        let result = self.select_entities(cnd);
        self.record(result)
    }

    fn select_entities<E: Entity>(&mut self, cnd: &mut Cnd) -> Result<Vec<E>> {
        let meta = entity_meta::<E>(cnd)?;
        let projection = project(&meta, &cnd.fields)?;
        let mut params = Vec::new();
        let sql = format!(
            "{}{}{}",
            select_sql(&projection.columns, meta.table),
            where_clause(cnd, &mut params)?,
            order_by(cnd)
        );
        let sql = self.paginate(cnd, sql, &params)?;
        let rows = self.query(&sql, &params)?;
        self.decode_rows(&projection.bindings, rows.rows)
    }

    /// Free-form select over `from`/joins into an output record. Columns are
    /// matched to record fields by name; unmatched columns are ignored.
    pub fn find_complex<R: Record>(&mut self, cnd: &mut Cnd) -> Result<Vec<R>> {
        let result = self.find_complex_inner(cnd);
        self.record(result)
    }

    pub fn find_complex_one<R: Record>(&mut self, cnd: &mut Cnd) -> Result<Option<R>> {
        if !cnd.pagination.is_set() {
            cnd.pagination = Pagination::offset(0, 1);
        }
        let result = self.find_complex_inner(cnd).map(|rows| rows.into_iter().next());
        self.record(result)
    }

    fn find_complex_inner<R: Record>(&mut self, cnd: &mut Cnd) -> Result<Vec<R>> {
        if cnd.fields.is_empty() {
            return Err(DbError::Input("find_complex: no fields selected".to_string()));
        }
        if cnd.from.table.is_empty() {
            return Err(DbError::Input("find_complex: no from table".to_string()));
        }
        let record = resolve_record::<R>()?;

        let mut params = Vec::new();
        let distinct = if cnd.distincts.is_empty() { "" } else { "DISTINCT " };
        let sql = format!(
            "SELECT {}{}{}{}{}{}",
            distinct,
            cnd.fields.join(", "),
            from_clause(cnd),
            where_clause(cnd, &mut params)?,
            group_by(cnd),
            order_by(cnd)
        );
        let sql = self.paginate(cnd, sql, &params)?;
        let rows = self.query(&sql, &params)?;

        let matched: Vec<(usize, Binding<'_>)> = rows
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, column)| {
                let name = column.rsplit('.').next().unwrap_or(column);
                record
                    .persisted()
                    .find(|f| f.name == name && f.kind.is_relational())
                    .map(|f| (i, Binding::new(f.name, f.kind, f.date)))
            })
            .collect();
        let bindings: Vec<Binding<'_>> = matched.iter().map(|(_, b)| *b).collect();
        let narrowed: Vec<RawRow> = rows
            .rows
            .into_iter()
            .map(|row| matched.iter().map(|(i, _)| row.get(*i).cloned().flatten()).collect())
            .collect();
        self.decode_rows(&bindings, narrowed)
    }

    /// Apply the dialect's paging to `sql`, counting first in page-number mode.
    fn paginate(&self, cnd: &mut Cnd, sql: String, params: &[SqlValue]) -> Result<String> {
        if !cnd.pagination.is_set() {
            return Ok(sql);
        }
        let dialect = self.source.settings().dialect.strategy();
        if !dialect.support() {
            return Err(DialectError::Unsupported {
                dialect: dialect.name(),
                method: "pagination",
            }
            .into());
        }
        if !cnd.pagination.is_offset {
            let rows = self.query(&dialect.count_sql(&sql)?, params)?;
            cnd.pagination.apply_total(scalar_count(&rows.rows)?);
        }
        Ok(dialect.limit_sql(&sql, &cnd.pagination)?)
    }

    fn decode_rows<T: DeserializeOwned>(&self, bindings: &[Binding<'_>], rows: Vec<RawRow>) -> Result<Vec<T>> {
        let decoder = self.source.decoder();
        rows.iter()
            .map(|row| {
                let object = decoder.decode(bindings, row)?;
                Ok(serde_json::from_value(Value::Object(object))?)
            })
            .collect()
    }

    // ========== Close ==========

    /// Finish the unit of work. With a transaction: commit when no operation
    /// failed, roll back otherwise. Queued mirrors are written only when the
    /// relational changes stand.
    pub fn close(mut self) -> Result<()> {
        let failed = !self.errors.is_empty();
        let had_tx = self.tx.is_some();
        let outcome = match self.tx.take() {
            Some(tx) if failed => {
                tracing::warn!(errors = ?self.errors, "rolling back unit of work");
                tx.rollback()
            }
            Some(tx) => tx.commit(),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            tracing::error!(ds = self.source.name(), error = %e, "transaction close failed");
        }

        let queue = std::mem::take(&mut self.queue);
        if let Some(target) = self.mirror.take() {
            if outcome.is_ok() && !(had_tx && failed) {
                queue.flush(&target);
            }
        }

        Ok(outcome?)
    }
}

impl Drop for RdbSession {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(ds = self.source.name(), "session dropped without close, rolling back");
        }
    }
}

fn to_object<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Compile(format!("entity serialized to non-object {}", other))),
    }
}

fn model_meta(cnd: &Cnd) -> Result<Arc<EntityMeta>> {
    match cnd.model_meta() {
        Some(meta) => Ok(meta?),
        None => Err(DbError::Input(
            "condition model has no entity; build it with Cnd::of".to_string(),
        )),
    }
}

/// Metadata of `E`, checking that `cnd` targets it.
fn entity_meta<E: Entity>(cnd: &Cnd) -> Result<Arc<EntityMeta>> {
    match &cnd.model {
        Some(model) if model.is::<E>() => Ok(resolve::<E>()?),
        Some(model) => Err(DbError::Input(format!(
            "condition model targets {}, not {}",
            model.type_name,
            std::any::type_name::<E>()
        ))),
        None => model_meta(cnd),
    }
}

fn project<'m>(meta: &'m EntityMeta, wanted: &[String]) -> Result<Projection<'m>> {
    let want = |name: &str| wanted.is_empty() || wanted.iter().any(|w| w == name);
    let mut projection = Projection {
        columns: Vec::new(),
        bindings: Vec::new(),
    };
    if want(ID_COLUMN) || want(meta.id_field) {
        projection.columns.push(ID_COLUMN);
        projection
            .bindings
            .push(Binding::new(meta.id_field, FieldKind::Int64, false));
    }
    for field in meta.relational() {
        if want(field.name) {
            projection.columns.push(field.name);
            projection
                .bindings
                .push(Binding::new(field.name, field.kind, field.date));
        }
    }
    if projection.columns.is_empty() {
        return Err(DbError::Input(format!(
            "no requested field belongs to {}",
            meta.type_name
        )));
    }
    Ok(projection)
}
