mod config;
mod db;
mod detector;
mod engine;
mod error;
mod fetcher;
mod rotator;
mod snapshot;
mod state;
mod summary;
mod types;

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::engine::{EngineSettings, ReconciliationEngine};
use crate::error::{AppError, Result};
use crate::fetcher::SolanaTrackerClient;
use crate::rotator::KeyRotator;
use crate::state::Registry;
use crate::types::{BalanceReport, TradeReport};

/// Which cycles a single invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Balances,
    Trades,
    All,
}

impl RunMode {
    fn balances(self) -> bool {
        matches!(self, RunMode::Balances | RunMode::All)
    }

    fn trades(self) -> bool {
        matches!(self, RunMode::Trades | RunMode::All)
    }
}

impl FromStr for RunMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balances" => Ok(RunMode::Balances),
            "trades" => Ok(RunMode::Trades),
            "all" => Ok(RunMode::All),
            other => Err(AppError::Config(format!(
                "unknown mode '{other}', expected balances, trades or all"
            ))),
        }
    }
}

/// Document written to stdout for whatever renders the reports.
#[derive(Debug, Serialize)]
struct RunOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    balances: Option<BalanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trades: Option<TradeReport>,
}

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(std::io::stderr)
        .init();

    let mode = match std::env::args().nth(1).map(|a| a.parse::<RunMode>()) {
        None => RunMode::All,
        Some(Ok(m)) => m,
        Some(Err(e)) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cfg, mode).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, mode: RunMode) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = Arc::new(SqliteStore::new(pool));

    // --- Per-run registry ---
    let registry = Registry::load(store.as_ref()).await?;
    info!(
        "Registry loaded: {} wallets, {} tokens",
        registry.wallet_count(),
        registry.token_addresses().len(),
    );

    // --- Engine ---
    let client = Arc::new(SolanaTrackerClient::new(&cfg.api_url, cfg.fetch_timeout)?);
    let rotator = KeyRotator::new(cfg.api_keys.clone())?;
    let engine = ReconciliationEngine::new(
        store,
        client.clone(),
        client,
        rotator,
        EngineSettings::from_config(&cfg),
    );
    info!(
        "Engine ready: concurrency={} timeout={:?} policy={} threshold={}",
        cfg.fetch_concurrency, cfg.fetch_timeout, cfg.failure_policy, cfg.significance_threshold,
    );

    let mut output = RunOutput {
        balances: None,
        trades: None,
    };

    if mode.balances() {
        let report = engine.check_balances(&registry).await?;
        log_balance_report(&report, &registry);
        output.balances = Some(report);
    }

    if mode.trades() {
        let report = engine.check_trades(&registry).await?;
        log_trade_report(&report, &registry);
        output.trades = Some(report);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn log_balance_report(report: &BalanceReport, registry: &Registry) {
    match report.previous_check_time {
        Some(t) => info!("Balance changes since {t}"),
        None => info!("First balance check, no previous snapshot"),
    }

    for change in &report.changes {
        let alias = registry
            .wallet(&change.wallet_address)
            .map(|w| w.alias.as_str())
            .unwrap_or(change.wallet_address.as_str());
        let symbol = registry
            .token(&change.token_address)
            .map(|t| t.symbol.as_str())
            .unwrap_or(change.token_address.as_str());
        info!(
            wallet = %alias,
            token = %symbol,
            previous = %change.previous_balance,
            current = %change.current_balance,
            value_change = %change.value_change,
            "[CHANGE] {alias} {symbol}: {:+}",
            change.balance_change,
        );
    }

    for flow in &report.token_flows {
        info!(
            "[FLOW] {}: bought {} (${}) by {} wallets, sold {} (${}) by {} wallets",
            flow.symbol,
            flow.buy_amount,
            flow.buy_value,
            flow.buying_wallets,
            flow.sell_amount,
            flow.sell_value,
            flow.selling_wallets,
        );
    }

    if let Some(summary) = report.failure_summary() {
        warn!("{summary}");
    }
    if report.dropped_rows > 0 {
        warn!("Dropped {} unresolvable upstream rows", report.dropped_rows);
    }
}

fn log_trade_report(report: &TradeReport, registry: &Registry) {
    for trade in &report.trades {
        let alias = registry
            .wallet(&trade.wallet_address)
            .map(|w| w.alias.as_str())
            .unwrap_or(trade.wallet_address.as_str());
        info!(
            wallet = %alias,
            tx = %trade.tx_hash,
            price_usd = %trade.price_usd,
            "[TRADE] {alias}: {} -> {} ${} at {}",
            trade.from_token_symbol,
            trade.to_token_symbol,
            trade.volume_usd,
            trade.timestamp,
        );
    }
    if report.trades.is_empty() {
        info!("No new trades across {} wallets", report.wallets_checked);
    }
    if report.dropped_rows > 0 {
        warn!("Dropped {} unresolvable trade rows", report.dropped_rows);
    }
}
