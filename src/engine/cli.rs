//! Jorm CLI Module
//! Command-line interface for checking data sources and previewing paging

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::config::CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "jorm")]
#[command(version)]
#[command(about = "Relational and document persistence toolkit", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open every configured data source and ping it
    Check {
        /// Config file (defaults to jorm.config.json in the project directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the paged and counted forms of a select statement
    Paginate {
        /// Dialect name (mysql, oracle, db2, hsql, sqlserver, sqlserver2005, sybase, postgres, derby)
        #[arg(short, long, default_value = "mysql")]
        dialect: String,

        /// Page number, or the row offset with --offset
        #[arg(long, default_value = "1")]
        page_no: i64,

        #[arg(long, default_value = "10")]
        page_size: i64,

        /// Treat --page-no as a raw offset
        #[arg(long)]
        offset: bool,

        /// The select statement
        sql: String,
    },
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Explicit config path, or the default file in the project directory.
    pub fn config_path(&self, explicit: Option<&PathBuf>) -> PathBuf {
        explicit
            .cloned()
            .unwrap_or_else(|| self.get_project_dir().join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paginate() {
        let cli = Cli::parse_from([
            "jorm", "--format", "json", "paginate", "--page-no", "3", "--page-size", "20",
            "SELECT id FROM user",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Paginate { dialect, page_no, page_size, offset, sql } => {
                assert_eq!(dialect, "mysql");
                assert_eq!((page_no, page_size, offset), (3, 20, false));
                assert_eq!(sql, "SELECT id FROM user");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_config_path_default() {
        let cli = Cli::parse_from(["jorm", "-p", "/tmp/proj", "check"]);
        assert_eq!(cli.config_path(None), PathBuf::from("/tmp/proj").join(CONFIG_FILE));
        let explicit = PathBuf::from("/etc/jorm.json");
        assert_eq!(cli.config_path(Some(&explicit)), explicit);
    }
}
