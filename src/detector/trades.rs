use std::collections::HashSet;

use crate::types::Trade;

/// Filters fetched trades down to the ones never reported before.
pub struct TradeDeduplicator {
    seen: HashSet<String>,
}

impl TradeDeduplicator {
    /// `persisted` is every tx hash already in trade storage.
    pub fn new(persisted: HashSet<String>) -> Self {
        Self { seen: persisted }
    }

    /// Unseen trades in source order. Each returned hash is marked seen, so a
    /// hash repeated within `trades` is returned once.
    pub fn filter_new(&mut self, trades: Vec<Trade>) -> Vec<Trade> {
        trades
            .into_iter()
            .filter(|t| self.seen.insert(t.tx_hash.clone()))
            .collect()
    }
}
