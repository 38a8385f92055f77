use std::collections::HashMap;

use crate::db::RegistrySource;
use crate::error::{AppError, Result};
use crate::types::{Token, Wallet};

// ---------------------------------------------------------------------------
// AliasFilter
// ---------------------------------------------------------------------------

/// Splits wallets into balance-tracked and trade-tracked by alias substring.
#[derive(Debug, Clone, Default)]
pub struct AliasFilter {
    patterns: Vec<String>,
}

impl AliasFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn is_trade_wallet(&self, wallet: &Wallet) -> bool {
        self.patterns.iter().any(|p| wallet.alias.contains(p.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only wallet/token context for one reconciliation cycle.
///
/// Loaded once at cycle start and dropped at the end; growing or shrinking the
/// tracked set between cycles only changes the next `load`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    wallets: Vec<Wallet>,
    tokens: Vec<Token>,
    wallet_index: HashMap<String, usize>,
    token_index: HashMap<String, usize>,
}

impl Registry {
    pub async fn load(source: &dyn RegistrySource) -> Result<Self> {
        let wallets = source.list_wallets().await?;
        let tokens = source.list_tokens().await?;
        Ok(Self::new(wallets, tokens))
    }

    /// Builds the address maps. A repeated address keeps its first entry.
    pub fn new(wallets: Vec<Wallet>, tokens: Vec<Token>) -> Self {
        let mut wallet_index = HashMap::with_capacity(wallets.len());
        for (i, w) in wallets.iter().enumerate() {
            wallet_index.entry(w.address.clone()).or_insert(i);
        }
        let mut token_index = HashMap::with_capacity(tokens.len());
        for (i, t) in tokens.iter().enumerate() {
            token_index.entry(t.address.clone()).or_insert(i);
        }
        Self {
            wallets,
            tokens,
            wallet_index,
            token_index,
        }
    }

    pub fn wallet(&self, address: &str) -> Result<&Wallet> {
        self.wallet_index
            .get(address)
            .map(|&i| &self.wallets[i])
            .ok_or_else(|| AppError::NotFound {
                kind: "wallet",
                key: address.to_string(),
            })
    }

    pub fn token(&self, address: &str) -> Result<&Token> {
        self.token_index
            .get(address)
            .map(|&i| &self.tokens[i])
            .ok_or_else(|| AppError::NotFound {
                kind: "token",
                key: address.to_string(),
            })
    }

    /// Wallets with distinct addresses; repeats of an address are not counted.
    pub fn wallet_count(&self) -> usize {
        self.wallet_index.len()
    }

    /// Tracked token universe, sorted and de-duplicated.
    pub fn token_addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.token_index.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn balance_wallets(&self, filter: &AliasFilter) -> Vec<Wallet> {
        self.distinct_wallets()
            .filter(|w| !filter.is_trade_wallet(w))
            .cloned()
            .collect()
    }

    pub fn trade_wallets(&self, filter: &AliasFilter) -> Vec<Wallet> {
        self.distinct_wallets()
            .filter(|w| filter.is_trade_wallet(w))
            .cloned()
            .collect()
    }

    fn distinct_wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets
            .iter()
            .enumerate()
            .filter(|(i, w)| self.wallet_index.get(&w.address) == Some(i))
            .map(|(_, w)| w)
    }
}
