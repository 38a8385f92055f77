use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::{AppError, Result};

pub const SOLANA_TRACKER_API_URL: &str = "https://data.solanatracker.io";

/// Wrapped SOL mint. The chain's base asset moves on every fee payment, so it
/// never counts as a significant change.
pub const NATIVE_TOKEN_ADDRESS: &str = "So11111111111111111111111111111111111111112";

/// Minimum absolute balance delta (exclusive) for a change to be reported.
pub const SIGNIFICANCE_THRESHOLD: &str = "0.5";

/// Aliases that mark a wallet as trade-tracked instead of balance-tracked.
pub const TRADE_WALLET_ALIASES: &[&str] = &["Phantom", "BonkBot", "Bloom"];

/// Concurrent per-wallet fetches.
pub const FETCH_CONCURRENCY: usize = 4;

/// Per-wallet fetch timeout (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// What a balance cycle does when one wallet cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave the wallet out of this cycle and report it as a partial failure.
    SkipWallet,
    /// Abort the whole cycle on the first failed wallet.
    AbortCycle,
}

impl FromStr for FailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(FailurePolicy::SkipWallet),
            "abort" => Ok(FailurePolicy::AbortCycle),
            other => Err(AppError::Config(format!(
                "FETCH_FAILURE_POLICY must be 'skip' or 'abort', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::SkipWallet => write!(f, "skip"),
            FailurePolicy::AbortCycle => write!(f, "abort"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub api_url: String,
    /// Upstream credentials, rotated round-robin (SOLANA_TRACKER_API_KEYS, comma-separated)
    pub api_keys: Vec<String>,
    pub fetch_concurrency: usize,
    pub fetch_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub significance_threshold: Decimal,
    pub native_token_address: String,
    /// Alias substrings selecting trade-tracked wallets (TRADE_WALLET_ALIASES, comma-separated)
    pub trade_wallet_aliases: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_keys = split_list(&std::env::var("SOLANA_TRACKER_API_KEYS").unwrap_or_default());
        if api_keys.is_empty() {
            return Err(AppError::Config(
                "SOLANA_TRACKER_API_KEYS must contain at least one key".to_string(),
            ));
        }

        let threshold_raw = std::env::var("SIGNIFICANCE_THRESHOLD")
            .unwrap_or_else(|_| SIGNIFICANCE_THRESHOLD.to_string());
        let significance_threshold = Decimal::from_str(threshold_raw.trim()).map_err(|_| {
            AppError::Config(format!("SIGNIFICANCE_THRESHOLD must be a decimal, got '{threshold_raw}'"))
        })?;

        let trade_wallet_aliases = match std::env::var("TRADE_WALLET_ALIASES") {
            Ok(raw) => split_list(&raw),
            Err(_) => TRADE_WALLET_ALIASES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "wallet_tracker.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_url: std::env::var("SOLANA_TRACKER_API_URL")
                .unwrap_or_else(|_| SOLANA_TRACKER_API_URL.to_string()),
            api_keys,
            fetch_concurrency: std::env::var("FETCH_CONCURRENCY")
                .unwrap_or_else(|_| FETCH_CONCURRENCY.to_string())
                .parse::<usize>()
                .map_err(|_| AppError::Config("FETCH_CONCURRENCY must be a positive integer".to_string()))?
                .max(1),
            fetch_timeout: parse_timeout_secs(
                &std::env::var("FETCH_TIMEOUT_SECS").unwrap_or_else(|_| FETCH_TIMEOUT_SECS.to_string()),
            )?,
            failure_policy: std::env::var("FETCH_FAILURE_POLICY")
                .unwrap_or_else(|_| "skip".to_string())
                .parse()?,
            significance_threshold,
            native_token_address: std::env::var("NATIVE_TOKEN_ADDRESS")
                .unwrap_or_else(|_| NATIVE_TOKEN_ADDRESS.to_string()),
            trade_wallet_aliases,
        })
    }
}

/// A zero timeout would fail every fetch, so it is rejected outright.
fn parse_timeout_secs(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::Config("FETCH_TIMEOUT_SECS must be at least 1".to_string())),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(AppError::Config("FETCH_TIMEOUT_SECS must be an integer".to_string())),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_both_spellings() {
        assert_eq!("skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::SkipWallet);
        assert_eq!(" ABORT ".parse::<FailurePolicy>().unwrap(), FailurePolicy::AbortCycle);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert_eq!(parse_timeout_secs("30").unwrap(), Duration::from_secs(30));
        assert!(matches!(parse_timeout_secs("0"), Err(AppError::Config(_))));
        assert!(matches!(parse_timeout_secs("soon"), Err(AppError::Config(_))));
    }

    #[test]
    fn split_list_drops_blank_entries() {
        assert_eq!(split_list(" a, ,b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn default_threshold_is_exact_half() {
        assert_eq!(Decimal::from_str(SIGNIFICANCE_THRESHOLD).unwrap(), Decimal::new(5, 1));
    }
}
