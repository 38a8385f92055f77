use std::collections::{HashMap, HashSet};

use crate::types::{BalanceRow, RawBalanceRow};

/// Densifies sparse wallet holdings against the tracked token universe.
pub struct SnapshotAligner {
    tokens: Vec<String>,
}

impl SnapshotAligner {
    /// `tokens` is the tracked universe `T`; order and repeats do not matter.
    pub fn new(tokens: Vec<String>) -> Self {
        let mut tokens = tokens;
        tokens.sort();
        tokens.dedup();
        Self { tokens }
    }

    /// Exactly one row per tracked token, in token order.
    ///
    /// The first raw row for a token wins over later repeats and over the zero
    /// fill. Rows for untracked tokens are dropped.
    pub fn align_wallet(&self, wallet_address: &str, raw: &[RawBalanceRow]) -> Vec<BalanceRow> {
        let mut first: HashMap<&str, &RawBalanceRow> = HashMap::with_capacity(raw.len());
        for row in raw {
            first.entry(row.token_address.as_str()).or_insert(row);
        }

        self.tokens
            .iter()
            .map(|token| match first.get(token.as_str()) {
                Some(row) => BalanceRow {
                    wallet_address: wallet_address.to_string(),
                    token_address: token.clone(),
                    balance: row.balance,
                    value: row.value,
                },
                None => BalanceRow::zero(wallet_address, token),
            })
            .collect()
    }

    /// Aligns every wallet and sorts the union by (wallet, token).
    ///
    /// A wallet listed twice keeps only its first entry.
    pub fn align_current(&self, fetched: &[(String, Vec<RawBalanceRow>)]) -> Vec<BalanceRow> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(fetched.len());
        let mut rows: Vec<BalanceRow> = fetched
            .iter()
            .filter(|(wallet, _)| seen.insert(wallet.as_str()))
            .flat_map(|(wallet, raw)| self.align_wallet(wallet, raw))
            .collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        rows
    }

    /// The canonical key space for `wallets` × `T`.
    pub fn key_space(&self, wallets: &[String]) -> KeySpace {
        let mut wallets: Vec<String> = wallets.to_vec();
        wallets.sort();
        wallets.dedup();
        let keys = wallets
            .iter()
            .flat_map(|w| self.tokens.iter().map(move |t| (w.clone(), t.clone())))
            .collect();
        KeySpace { keys }
    }
}

/// Sorted (wallet, token) keys shared by both sides of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    keys: Vec<(String, String)>,
}

impl KeySpace {
    /// Re-derives arbitrary stored rows onto this key space: one row per key,
    /// first occurrence wins, zero when absent, keys outside the space dropped.
    pub fn densify(&self, rows: &[BalanceRow]) -> Vec<BalanceRow> {
        let mut first: HashMap<(&str, &str), &BalanceRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            first.entry(row.key()).or_insert(row);
        }

        self.keys
            .iter()
            .map(|(w, t)| match first.get(&(w.as_str(), t.as_str())) {
                Some(row) => (*row).clone(),
                None => BalanceRow::zero(w, t),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn raw(token: &str, balance: &str) -> RawBalanceRow {
        RawBalanceRow::new(token, dec(balance), dec(balance) * dec("2"))
    }

    fn aligner() -> SnapshotAligner {
        SnapshotAligner::new(vec!["C".to_string(), "A".to_string(), "B".to_string()])
    }

    #[test]
    fn zero_fills_every_missing_token() {
        let rows = aligner().align_wallet("W1", &[raw("B", "3")]);
        assert_eq!(rows.len(), 3);
        let summary: Vec<(&str, Decimal)> =
            rows.iter().map(|r| (r.token_address.as_str(), r.balance)).collect();
        assert_eq!(summary, vec![("A", dec("0")), ("B", dec("3")), ("C", dec("0"))]);
        assert!(rows.iter().all(|r| r.wallet_address == "W1"));
        assert_eq!(rows[0].value, Decimal::ZERO);
    }

    #[test]
    fn empty_holdings_still_produce_full_rows() {
        let rows = aligner().align_wallet("W1", &[]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.balance.is_zero() && r.value.is_zero()));
    }

    #[test]
    fn untracked_tokens_are_dropped() {
        let rows = aligner().align_wallet("W1", &[raw("Z", "100"), raw("A", "1")]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.token_address != "Z"));
        assert_eq!(rows[0].balance, dec("1"));
    }

    #[test]
    fn first_duplicate_wins() {
        let rows = aligner().align_wallet("W1", &[raw("A", "7"), raw("A", "9")]);
        assert_eq!(rows[0].balance, dec("7"));
    }

    #[test]
    fn empty_universe_yields_nothing() {
        let aligner = SnapshotAligner::new(Vec::new());
        assert!(aligner.align_wallet("W1", &[raw("A", "1")]).is_empty());
    }

    #[test]
    fn current_snapshot_is_sorted_and_reproducible() {
        let fetched = vec![
            ("W2".to_string(), vec![raw("C", "1"), raw("A", "2")]),
            ("W1".to_string(), vec![raw("B", "3"), raw("B", "4")]),
        ];
        let first = aligner().align_current(&fetched);
        let second = aligner().align_current(&fetched);
        assert_eq!(first, second);

        let keys: Vec<(&str, &str)> = first.iter().map(|r| r.key()).collect();
        assert_eq!(
            keys,
            vec![("W1", "A"), ("W1", "B"), ("W1", "C"), ("W2", "A"), ("W2", "B"), ("W2", "C")]
        );
        assert_eq!(first[1].balance, dec("3"));
    }

    #[test]
    fn densify_matches_current_key_order() {
        let aligner = aligner();
        let wallets = vec!["W2".to_string(), "W1".to_string()];
        let space = aligner.key_space(&wallets);

        let stored = vec![
            BalanceRow {
                wallet_address: "W2".to_string(),
                token_address: "B".to_string(),
                balance: dec("5"),
                value: dec("1"),
            },
            // token no longer tracked
            BalanceRow {
                wallet_address: "W1".to_string(),
                token_address: "OLD".to_string(),
                balance: dec("8"),
                value: dec("8"),
            },
            // wallet not part of this cycle
            BalanceRow {
                wallet_address: "W9".to_string(),
                token_address: "A".to_string(),
                balance: dec("1"),
                value: dec("1"),
            },
        ];
        let previous = space.densify(&stored);
        assert_eq!(previous.len(), 6);
        let current = aligner.align_current(&[
            ("W1".to_string(), vec![]),
            ("W2".to_string(), vec![raw("B", "4")]),
        ]);

        let prev_keys: Vec<_> = previous.iter().map(|r| r.key()).collect();
        let cur_keys: Vec<_> = current.iter().map(|r| r.key()).collect();
        assert_eq!(prev_keys, cur_keys);
        assert_eq!(previous[4].balance, dec("5"));
        assert_eq!(previous.iter().filter(|r| !r.balance.is_zero()).count(), 1);
    }
}
