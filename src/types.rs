use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::summary::TokenFlow;

// ---------------------------------------------------------------------------
// Registry entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

// ---------------------------------------------------------------------------
// Balance snapshots
// ---------------------------------------------------------------------------

/// One holding as reported upstream for a single wallet. Sparse: only tokens
/// the wallet actually holds, possibly with repeats or untracked tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBalanceRow {
    pub token_address: String,
    pub balance: Decimal,
    pub value: Decimal,
}

impl RawBalanceRow {
    pub fn new(token_address: impl Into<String>, balance: Decimal, value: Decimal) -> Self {
        Self {
            token_address: token_address.into(),
            balance,
            value,
        }
    }
}

/// One (wallet, token) observation of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub wallet_address: String,
    pub token_address: String,
    pub balance: Decimal,
    pub value: Decimal,
}

impl BalanceRow {
    pub fn zero(wallet_address: &str, token_address: &str) -> Self {
        Self {
            wallet_address: wallet_address.to_string(),
            token_address: token_address.to_string(),
            balance: Decimal::ZERO,
            value: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.wallet_address, &self.token_address)
    }
}

/// A dense snapshot ready to be appended to history.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// Wallets that were successfully observed in this snapshot.
    pub wallets: Vec<String>,
    /// Rows to write. Zero balances are filtered out by the engine before this point.
    pub rows: Vec<BalanceRow>,
}

/// Latest persisted observation for every known key, absent keys meaning zero.
#[derive(Debug, Clone, Default)]
pub struct PreviousSnapshot {
    pub rows: Vec<BalanceRow>,
    pub previous_check_time: Option<DateTime<Utc>>,
}

/// Per-key delta between the current and previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub wallet_address: String,
    pub token_address: String,
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    pub balance_change: Decimal,
    pub value_change: Decimal,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub tx_hash: String,
    pub wallet_address: String,
    pub from_token_symbol: String,
    pub to_token_symbol: String,
    pub price_usd: Decimal,
    pub volume_usd: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cycle reports
// ---------------------------------------------------------------------------

/// A wallet the balance cycle could not observe.
#[derive(Debug, Clone, Serialize)]
pub struct WalletFailure {
    pub wallet_address: String,
    pub alias: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    /// Significant changes only, in canonical (wallet, token) order.
    pub changes: Vec<BalanceChange>,
    pub previous_check_time: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
    pub wallets_total: usize,
    pub wallets_checked: usize,
    pub failures: Vec<WalletFailure>,
    /// Upstream rows dropped for data-quality reasons.
    pub dropped_rows: usize,
    pub token_flows: Vec<TokenFlow>,
}

impl BalanceReport {
    /// "N of M wallets could not be checked", or None when every wallet was observed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(format!(
            "{} of {} wallets could not be checked",
            self.failures.len(),
            self.wallets_total
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeReport {
    pub trades: Vec<Trade>,
    pub wallets_checked: usize,
    pub dropped_rows: usize,
}

// ---------------------------------------------------------------------------
// Cycle state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    FetchingBalances,
    FetchingTrades,
    Aligning,
    Diffing,
    Deduplicating,
    Persisting,
    Done,
    Failed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::FetchingBalances => "fetching_balances",
            CyclePhase::FetchingTrades => "fetching_trades",
            CyclePhase::Aligning => "aligning",
            CyclePhase::Diffing => "diffing",
            CyclePhase::Deduplicating => "deduplicating",
            CyclePhase::Persisting => "persisting",
            CyclePhase::Done => "done",
            CyclePhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Progress notifications emitted while a cycle runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    Phase(CyclePhase),
    /// Emitted at dispatch time, in submission order.
    WalletStarted { alias: String, index: usize, total: usize },
    WalletFailed { alias: String, error: String },
}
