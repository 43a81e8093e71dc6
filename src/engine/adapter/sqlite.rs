//! SQLite Adapter
//!
//! rusqlite + r2d2 connection pooling. Statements go through the connection's
//! prepared-statement cache, so a batch of same-shaped inserts prepares once.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{AdapterError, AdapterResult, ExecResult, RawRow, RawRows, SqlExecutor};
use crate::engine::sqlc::SqlValue;

type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled SQLite database
pub struct SqliteSource {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteSource {
    pub fn new(db_path: &Path, pool_size: u32) -> AdapterResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let source = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        source.init_pragmas()?;
        Ok(source)
    }

    pub fn in_memory() -> AdapterResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let source = Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        };
        source.init_pragmas()?;
        Ok(source)
    }

    fn init_pragmas(&self) -> AdapterResult<()> {
        let conn = self.get_conn()?;
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON")
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(())
    }

    pub fn get_conn(&self) -> AdapterResult<DbConn> {
        self.pool
            .get()
            .map_err(|e| AdapterError::Connection(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Execute multiple statements as a batch
    pub fn execute_batch(&self, sql: &str) -> AdapterResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))
    }

    /// Test the connection is alive
    pub fn test_connection(&self) -> AdapterResult<()> {
        let conn = self.get_conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Start a transaction on a dedicated pooled connection.
    pub fn begin(&self) -> AdapterResult<SqliteTx> {
        let conn = self.get_conn()?;
        conn.execute_batch("BEGIN")
            .map_err(|e| AdapterError::Transaction(e.to_string()))?;
        Ok(SqliteTx { conn, done: false })
    }
}

/// An open transaction. Dropping it without `commit` rolls back.
pub struct SqliteTx {
    conn: DbConn,
    done: bool,
}

impl SqliteTx {
    pub fn commit(mut self) -> AdapterResult<()> {
        self.finish("COMMIT")
    }

    pub fn rollback(mut self) -> AdapterResult<()> {
        self.finish("ROLLBACK")
    }

    fn finish(&mut self, statement: &str) -> AdapterResult<()> {
        self.done = true;
        self.conn
            .execute_batch(statement)
            .map_err(|e| AdapterError::Transaction(e.to_string()))
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.finish("ROLLBACK") {
                tracing::error!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}

impl SqlExecutor for SqliteTx {
    fn query_raw(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<RawRows> {
        self.conn.query_raw(sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<ExecResult> {
        SqlExecutor::execute(&*self.conn, sql, params)
    }
}

impl SqlExecutor for Connection {
    fn query_raw(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<RawRows> {
        let mut stmt = self
            .prepare_cached(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let width = columns.len();

        let mut cursor = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let mut rows = Vec::new();
        while let Some(row) = cursor
            .next()
            .map_err(|e| AdapterError::Query(e.to_string()))?
        {
            let mut raw: RawRow = Vec::with_capacity(width);
            for i in 0..width {
                let value = row
                    .get_ref(i)
                    .map_err(|e| AdapterError::Query(e.to_string()))?;
                raw.push(value_ref_to_text(value));
            }
            rows.push(raw);
        }

        Ok(RawRows { columns, rows })
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AdapterResult<ExecResult> {
        let start = Instant::now();
        let mut stmt = self
            .prepare_cached(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        let affected = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        Ok(ExecResult {
            affected_rows: affected as u64,
            last_insert_id: Some(self.last_insert_rowid()),
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Render a column value as the text the row decoder parses
fn value_ref_to_text(val: ValueRef<'_>) -> Option<String> {
    match val {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn source() -> SqliteSource {
        let source = SqliteSource::in_memory().unwrap();
        source
            .execute_batch("CREATE TABLE item (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, qty INTEGER)")
            .unwrap();
        source
    }

    #[test]
    fn test_execute_and_query_raw() {
        let source = source();
        let conn = source.get_conn().unwrap();
        let res = SqlExecutor::execute(
            &*conn,
            "INSERT INTO item (name, qty) VALUES (?, ?)",
            &[SqlValue::from("bolt"), SqlValue::from(4i64)],
        )
        .unwrap();
        assert_eq!(res.affected_rows, 1);
        assert_eq!(res.last_insert_id, Some(1));

        let rows = conn
            .query_raw("SELECT id, name, qty, NULL AS missing FROM item WHERE qty > ?", &[SqlValue::from(1i64)])
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "qty", "missing"]);
        assert_eq!(
            rows.rows,
            vec![vec![
                Some("1".to_string()),
                Some("bolt".to_string()),
                Some("4".to_string()),
                None
            ]]
        );
    }

    #[test]
    fn test_transaction_rollback_and_drop() {
        let dir = tempdir().unwrap();
        let source = SqliteSource::new(&dir.path().join("tx.db"), 2).unwrap();
        source
            .execute_batch("CREATE TABLE item (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let tx = source.begin().unwrap();
        tx.execute("INSERT INTO item (name) VALUES (?)", &[SqlValue::from("a")])
            .unwrap();
        tx.rollback().unwrap();

        {
            let tx = source.begin().unwrap();
            tx.execute("INSERT INTO item (name) VALUES (?)", &[SqlValue::from("b")])
                .unwrap();
        }

        let tx = source.begin().unwrap();
        tx.execute("INSERT INTO item (name) VALUES (?)", &[SqlValue::from("c")])
            .unwrap();
        tx.commit().unwrap();

        let conn = source.get_conn().unwrap();
        let rows = conn.query_raw("SELECT name FROM item", &[]).unwrap();
        assert_eq!(rows.rows, vec![vec![Some("c".to_string())]]);
    }

    #[test]
    fn test_connection_alive() {
        assert!(source().test_connection().is_ok());
    }
}
