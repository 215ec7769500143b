//! logmill - batch analytics for CDN access logs
//!
//! Crunches JSON access-log files into a SQLite database and answers
//! questions about the traffic:
//! - Dictionary-encoded dimensions (paths, referers, agents, ASNs, IPs)
//! - An append-only request fact table
//! - Windowed top-N reports over a composable cleanup pipeline

mod config;
mod db;
mod enrich;
mod error;
mod filter;
mod ingest;
mod record;
mod report;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: logmill <command>

commands:
  ingest <file>...                    crunch log files into the database
  report <name> [--window-days N] [--top N]
                                      print a report; names: agents, referers,
                                      pages, articles, articles-per-day-top3,
                                      errors, scanning-asns, traffic-count
  enrich-asns                         fill in autonomous-system names
";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    // Use LOG_FORMAT=gcp for structured Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::INFO)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();
    }

    let config = config::Config::load()?;

    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("ingest") if args.len() > 2 => cmd_ingest(&db, &args[2..]).await?,
        Some("report") if args.len() > 2 => cmd_report(&db, &config, &args[2..]).await?,
        Some("enrich-asns") => enrich::asn_catchup(&db).await?,
        _ => {
            eprint!("{USAGE}");
            return Ok(ExitCode::from(2));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_ingest(db: &db::Database, files: &[String]) -> Result<()> {
    let mut ok = 0;
    let mut failed = 0;
    for file in files {
        info!("processing {file}");
        match ingest::ingest_file(db, Path::new(file)).await {
            Ok(stats) => {
                info!(
                    "completed {file}: {} ingested, {} skipped",
                    stats.ingested, stats.skipped
                );
                ok += 1;
            }
            Err(err) => {
                tracing::error!("failed {file}: {err:#}");
                failed += 1;
            }
        }
    }
    info!(
        "crunched {} files: {ok} ok, {failed} failed; {} requests stored in total",
        ok + failed,
        db.total_requests().await?
    );
    Ok(())
}

async fn cmd_report(db: &db::Database, config: &config::Config, args: &[String]) -> Result<()> {
    let name = &args[0];
    let mut params = report::ReportParams::from_config(config);

    let mut rest = args[1..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))?;
        match flag.as_str() {
            "--window-days" => params.window_days = value.parse()?,
            "--top" => params.top_n = value.parse()?,
            other => anyhow::bail!("unknown flag {other}"),
        }
    }

    let table = report::run_report(db, name, &params, config).await?;
    print_table(&table);
    Ok(())
}

/// Render a result set as aligned columns. Long values are shortened
/// here, at display time only; grouping has already happened on the full
/// values.
fn print_table(table: &report::Table) {
    const CELL_LIMIT: usize = 72;

    let clipped: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(|cell| clip(cell, CELL_LIMIT)).collect())
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.len()).collect();
    for row in &clipped {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c:<width$}", width = widths[i]))
        .collect();
    println!("{}", header.join("  "));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 2 * (widths.len().saturating_sub(1))));
    for row in &clipped {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
            .collect();
        println!("{}", cells.join("  "));
    }
}

fn clip(cell: &str, limit: usize) -> String {
    if cell.chars().count() <= limit {
        cell.to_string()
    } else {
        let mut out: String = cell.chars().take(limit - 1).collect();
        out.push('…');
        out
    }
}
