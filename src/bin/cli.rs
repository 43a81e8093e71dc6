//! Jorm CLI - Main entry point for CLI binary
//!
//! This binary provides the `jorm` tool for checking data sources and
//! previewing dialect paging.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Instant;

use jorm::engine::{
    adapter::SqlDialect,
    cli::{
        formatter::{format_cost, CliFormatter},
        Cli, Commands, OutputFormat,
    },
    config::Config,
    logging::init_tracing,
    registry::DataSources,
    sqlc::Pagination,
};

fn main() {
    init_tracing("jorm=info,warn");
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let json_output = cli.format == OutputFormat::Json;

    match &cli.command {
        Commands::Check { config } => {
            let path = cli.config_path(config.as_ref());
            cmd_check(&path, json_output)?;
        }
        Commands::Paginate {
            dialect,
            page_no,
            page_size,
            offset,
            sql,
        } => {
            cmd_paginate(dialect, *page_no, *page_size, *offset, sql, json_output)?;
        }
    }

    Ok(())
}

fn cmd_check(config_path: &Path, json: bool) -> Result<()> {
    let config = Config::from_path(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let sources = DataSources::from_config(&config, None).context("opening data sources")?;

    let start = Instant::now();
    let results = sources.ping();
    let elapsed = format_cost(start.elapsed().as_millis());

    let mut failed = 0;
    let report: Vec<(String, Option<String>)> = results
        .into_iter()
        .map(|(name, res)| {
            let err = res.err().map(|e| e.to_string());
            if err.is_some() {
                failed += 1;
            }
            (name, err)
        })
        .collect();

    if json {
        let items: Vec<_> = report
            .iter()
            .map(|(name, err)| serde_json::json!({ "source": name, "ok": err.is_none(), "error": err }))
            .collect();
        println!(
            "{}",
            serde_json::json!({ "config": config_path.display().to_string(), "elapsed": elapsed, "sources": items })
        );
    } else {
        CliFormatter::header("Data sources");
        CliFormatter::kv("config", &config_path.display().to_string());
        CliFormatter::kv("elapsed", &elapsed);
        if report.is_empty() {
            CliFormatter::warning("no data sources configured");
        }
        for (name, err) in &report {
            match err {
                None => CliFormatter::success(name),
                Some(e) => CliFormatter::error(&format!("{}: {}", name, e)),
            }
        }
    }

    if failed > 0 {
        bail!("{} data source(s) failed", failed);
    }
    Ok(())
}

fn cmd_paginate(dialect: &str, page_no: i64, page_size: i64, offset: bool, sql: &str, json: bool) -> Result<()> {
    let strategy = SqlDialect::parse(dialect)?.strategy();
    if !strategy.support() {
        bail!("dialect {} does not support pagination", strategy.name());
    }
    let page = if offset {
        Pagination::offset(page_no, page_size)
    } else {
        Pagination::page(page_no, page_size)
    };
    let limited = strategy.limit_sql(sql, &page)?;
    let counted = strategy.count_sql(sql)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dialect": strategy.name(),
                "pagination": page,
                "limit_sql": limited,
                "count_sql": counted,
            })
        );
    } else {
        CliFormatter::header(&format!("{} pagination", strategy.name()));
        CliFormatter::kv("page", &format!("{} x {} (skip {})", page.page_no, page.page_size, page.skip()));
        CliFormatter::kv("limit", "");
        CliFormatter::statement(&limited);
        CliFormatter::kv("count", "");
        CliFormatter::statement(&counted);
    }
    Ok(())
}
