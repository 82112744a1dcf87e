//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the API server and the operational one-shots.
//! Handles shared concerns: environment loading, structured logging, and the
//! Tokio runtime, all set up here before dispatch.
//!
//! ## Subcommands
//!
//! - `serve`: run the HTTP API with its background sweep/audit loop.
//! - `audit`: recompute every cached balance from the ledger and report
//!   drift; exits non-zero if any account disagrees.
//! - `pay-salaries`: pay monthly referral salaries for a month (idempotent,
//!   each user is paid at most once per month).
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection string.

use anyhow::Result;
use chrono::Datelike;
use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use hashvault::config::Config;
use hashvault::db;
use hashvault::ledger::money;

#[derive(Parser)]
#[command(name = "hashvault", about = "Cloud-mining rewards ledger and API server")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Port to listen on
        #[arg(long, env = "HASHVAULT_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Recompute cached balances from the ledger and report drift
    Audit,
    /// Pay monthly referral salaries
    PaySalaries {
        /// Target month as YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let database_url = cli.database_url.clone().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Serve { port } => {
            rt.block_on(hashvault::api::run(Config::from_env(database_url, port)))
        }
        Commands::Audit => rt.block_on(run_audit(&database_url)),
        Commands::PaySalaries { month } => {
            rt.block_on(run_pay_salaries(&database_url, month.as_deref()))
        }
    }
}

async fn run_audit(database_url: &str) -> Result<()> {
    let database = db::Database::connect(database_url).await?;
    let rows = database.audit_balances().await?;
    if rows.is_empty() {
        println!("all cached balances match the ledger");
        return Ok(());
    }
    for r in &rows {
        println!(
            "{} <{}>: cached {} vs ledger {} (drift {}), T-Coin drift {}",
            r.user_id,
            r.email,
            money::format_usdc(r.cached_micros),
            money::format_usdc(r.ledger_micros),
            money::format_usdc(r.drift_micros),
            r.drift_tcoin,
        );
    }
    anyhow::bail!("{} account(s) drifted from the ledger", rows.len())
}

async fn run_pay_salaries(database_url: &str, month: Option<&str>) -> Result<()> {
    let month = match month {
        Some(raw) => chrono::NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d")
            .map_err(|_| anyhow::anyhow!("--month must be formatted YYYY-MM"))?,
        None => {
            let today = chrono::Utc::now().date_naive();
            today.with_day(1).unwrap_or(today)
        }
    };
    let database = db::Database::connect(database_url).await?;
    let report = database.pay_monthly_salaries(month).await?;
    println!(
        "salary run for {}: paid {}, skipped {} already-paid, total {}",
        report.month,
        report.paid,
        report.skipped,
        money::format_usdc(report.total_micros),
    );
    Ok(())
}
