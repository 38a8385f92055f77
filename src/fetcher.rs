use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::types::{RawBalanceRow, Trade};

/// Holdings for one wallet, plus how many upstream rows were unusable.
#[derive(Debug, Clone, Default)]
pub struct FetchedBalances {
    pub rows: Vec<RawBalanceRow>,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedTrades {
    pub trades: Vec<Trade>,
    pub dropped: usize,
}

#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    async fn fetch_balances(
        &self,
        wallet_address: &str,
        credential: &str,
    ) -> std::result::Result<FetchedBalances, FetchError>;
}

#[async_trait]
pub trait TradeFetcher: Send + Sync {
    async fn fetch_trades(
        &self,
        wallet_address: &str,
        credential: &str,
    ) -> std::result::Result<FetchedTrades, FetchError>;
}

// ---------------------------------------------------------------------------
// Solana Tracker REST client
// ---------------------------------------------------------------------------

pub struct SolanaTrackerClient {
    client: reqwest::Client,
    base_url: String,
}

impl SolanaTrackerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str, credential: &str) -> std::result::Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .header("x-api-key", credential)
            .send()
            .await?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(url.to_string())),
            s if !s.is_success() => return Err(FetchError::Status(s.as_u16())),
            _ => {}
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl BalanceFetcher for SolanaTrackerClient {
    async fn fetch_balances(
        &self,
        wallet_address: &str,
        credential: &str,
    ) -> std::result::Result<FetchedBalances, FetchError> {
        let url = format!("{}/wallet/{}", self.base_url, wallet_address);
        let body = self.get_json(&url, credential).await?;
        parse_wallet_balances(&body)
    }
}

#[async_trait]
impl TradeFetcher for SolanaTrackerClient {
    async fn fetch_trades(
        &self,
        wallet_address: &str,
        credential: &str,
    ) -> std::result::Result<FetchedTrades, FetchError> {
        let url = format!("{}/wallet/{}/trades", self.base_url, wallet_address);
        let body = self.get_json(&url, credential).await?;
        parse_wallet_trades(wallet_address, &body)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a `/wallet/{address}` body. Rows without a mint or a usable balance
/// are dropped and counted; a missing `value` counts as zero.
pub fn parse_wallet_balances(body: &Value) -> std::result::Result<FetchedBalances, FetchError> {
    let items = body
        .get("tokens")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("missing 'tokens' array".to_string()))?;

    let mut fetched = FetchedBalances::default();
    for item in items {
        match parse_balance_item(item) {
            Some(row) => fetched.rows.push(row),
            None => {
                debug!(item = %item, "Dropping unresolvable balance row");
                fetched.dropped += 1;
            }
        }
    }
    Ok(fetched)
}

fn parse_balance_item(item: &Value) -> Option<RawBalanceRow> {
    let mint = item.get("token")?.get("mint")?.as_str()?;
    if mint.is_empty() {
        return None;
    }
    let balance = json_decimal(item.get("balance")?)?;
    let value = match item.get("value") {
        None | Some(Value::Null) => Decimal::ZERO,
        Some(v) => json_decimal(v)?,
    };
    Some(RawBalanceRow::new(mint, balance, value))
}

/// Parse a `/wallet/{address}/trades` body. Trades with any unresolvable
/// field are dropped and counted.
pub fn parse_wallet_trades(
    wallet_address: &str,
    body: &Value,
) -> std::result::Result<FetchedTrades, FetchError> {
    let items = body
        .get("trades")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("missing 'trades' array".to_string()))?;

    let mut fetched = FetchedTrades::default();
    for item in items {
        match parse_trade_item(wallet_address, item) {
            Some(trade) => fetched.trades.push(trade),
            None => {
                debug!(wallet = %wallet_address, item = %item, "Dropping unresolvable trade row");
                fetched.dropped += 1;
            }
        }
    }
    Ok(fetched)
}

fn parse_trade_item(wallet_address: &str, item: &Value) -> Option<Trade> {
    let tx_hash = item.get("tx")?.as_str().filter(|s| !s.is_empty())?;
    let from_symbol = item.get("from")?.get("token")?.get("symbol")?.as_str()?;
    let to_symbol = item.get("to")?.get("token")?.get("symbol")?.as_str()?;
    let price_usd = json_decimal(item.get("price")?.get("usd")?)?;
    let volume_usd = json_decimal(item.get("volume")?.get("usd")?)?;
    let time = item.get("time")?;
    let millis = time.as_i64().or_else(|| time.as_str().and_then(|s| s.parse().ok()))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)?;

    Some(Trade {
        tx_hash: tx_hash.to_string(),
        wallet_address: wallet_address.to_string(),
        from_token_symbol: from_symbol.to_string(),
        to_token_symbol: to_symbol.to_string(),
        price_usd,
        volume_usd,
        timestamp,
    })
}

/// Decimal from a JSON number or numeric string, read from its text so no
/// binary float rounding leaks in.
pub fn json_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        Value::String(s) => parse_decimal_str(s.trim()),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
