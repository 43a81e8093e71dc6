//! SQL Dialect Pagination
//!
//! Wraps a finished SELECT with the dialect's paging clause and derives the
//! matching count statement. MySQL is implemented; the remaining dialects are
//! registered but report themselves unsupported.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::engine::sqlc::Pagination;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialectError {
    #[error("dialect {dialect} does not support {method}")]
    Unsupported {
        dialect: &'static str,
        method: &'static str,
    },
    #[error("unknown dialect: {0}")]
    Unknown(String),
}

pub type DialectResult<T> = Result<T, DialectError>;

/// Pagination strategy of one SQL dialect
pub trait PageDialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn support(&self) -> bool;

    /// Statement counting the rows of `sql`.
    fn count_sql(&self, sql: &str) -> DialectResult<String>;

    /// `sql` restricted to the window of `page`.
    fn limit_sql(&self, sql: &str, page: &Pagination) -> DialectResult<String>;
}

pub struct MysqlDialect;

impl PageDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn support(&self) -> bool {
        true
    }

    fn count_sql(&self, sql: &str) -> DialectResult<String> {
        Ok(format!("SELECT count(1) FROM ({}) AS probe", sql))
    }

    fn limit_sql(&self, sql: &str, page: &Pagination) -> DialectResult<String> {
        Ok(format!("{} LIMIT {},{}", sql, page.skip(), page.page_size))
    }
}

macro_rules! unsupported_dialect {
    ($($ty:ident => $name:literal),* $(,)?) => {
        $(
            pub struct $ty;

            impl PageDialect for $ty {
                fn name(&self) -> &'static str {
                    $name
                }

                fn support(&self) -> bool {
                    false
                }

                fn count_sql(&self, _sql: &str) -> DialectResult<String> {
                    Err(DialectError::Unsupported { dialect: $name, method: "count_sql" })
                }

                fn limit_sql(&self, _sql: &str, _page: &Pagination) -> DialectResult<String> {
                    Err(DialectError::Unsupported { dialect: $name, method: "limit_sql" })
                }
            }
        )*
    };
}

unsupported_dialect!(
    OracleDialect => "oracle",
    Db2Dialect => "db2",
    HsqlDialect => "hsql",
    SqlServerDialect => "sqlserver",
    SqlServer2005Dialect => "sqlserver2005",
    SybaseDialect => "sybase",
    PostgresDialect => "postgres",
    DerbyDialect => "derby",
);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Mysql,
    Oracle,
    Db2,
    Hsql,
    SqlServer,
    SqlServer2005,
    Sybase,
    Postgres,
    Derby,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.strategy().name())
    }
}

impl FromStr for SqlDialect {
    type Err = DialectError;

    fn from_str(s: &str) -> DialectResult<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::Mysql),
            "oracle" => Ok(SqlDialect::Oracle),
            "db2" => Ok(SqlDialect::Db2),
            "hsql" | "hsqldb" => Ok(SqlDialect::Hsql),
            "sqlserver" | "mssql" => Ok(SqlDialect::SqlServer),
            "sqlserver2005" => Ok(SqlDialect::SqlServer2005),
            "sybase" => Ok(SqlDialect::Sybase),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "derby" => Ok(SqlDialect::Derby),
            _ => Err(DialectError::Unknown(s.to_string())),
        }
    }
}

impl SqlDialect {
    pub fn parse(s: &str) -> DialectResult<Self> {
        s.parse()
    }

    pub fn strategy(&self) -> &'static dyn PageDialect {
        match self {
            SqlDialect::Mysql => &MysqlDialect,
            SqlDialect::Oracle => &OracleDialect,
            SqlDialect::Db2 => &Db2Dialect,
            SqlDialect::Hsql => &HsqlDialect,
            SqlDialect::SqlServer => &SqlServerDialect,
            SqlDialect::SqlServer2005 => &SqlServer2005Dialect,
            SqlDialect::Sybase => &SybaseDialect,
            SqlDialect::Postgres => &PostgresDialect,
            SqlDialect::Derby => &DerbyDialect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_limit() {
        let sql = "SELECT id FROM user";
        let limited = MysqlDialect
            .limit_sql(sql, &Pagination::page(3, 10))
            .unwrap();
        assert_eq!(limited, "SELECT id FROM user LIMIT 20,10");

        let limited = MysqlDialect
            .limit_sql(sql, &Pagination::offset(7, 5))
            .unwrap();
        assert_eq!(limited, "SELECT id FROM user LIMIT 7,5");

        let limited = MysqlDialect
            .limit_sql(sql, &Pagination::page(i64::MAX / 2, 5000))
            .unwrap();
        assert_eq!(limited, format!("SELECT id FROM user LIMIT {},5000", i64::MAX));
    }

    #[test]
    fn test_mysql_count() {
        assert_eq!(
            MysqlDialect.count_sql("SELECT id FROM user").unwrap(),
            "SELECT count(1) FROM (SELECT id FROM user) AS probe"
        );
    }

    #[test]
    fn test_stub_dialects_unsupported() {
        for dialect in [
            SqlDialect::Oracle,
            SqlDialect::Db2,
            SqlDialect::Hsql,
            SqlDialect::SqlServer,
            SqlDialect::SqlServer2005,
            SqlDialect::Sybase,
            SqlDialect::Postgres,
            SqlDialect::Derby,
        ] {
            let strategy = dialect.strategy();
            assert!(!strategy.support());
            assert!(strategy.count_sql("SELECT 1").is_err());
            assert!(strategy
                .limit_sql("SELECT 1", &Pagination::page(1, 10))
                .is_err());
        }
        assert!(SqlDialect::Mysql.strategy().support());
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("MariaDB".parse::<SqlDialect>().unwrap(), SqlDialect::Mysql);
        assert_eq!(SqlDialect::parse("pg").unwrap(), SqlDialect::Postgres);
        assert!(SqlDialect::parse("cobol").is_err());
        assert_eq!(SqlDialect::Postgres.to_string(), "postgres");
    }
}
