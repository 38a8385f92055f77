use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::Result;
use crate::state::Registry;
use crate::types::BalanceChange;

/// Aggregate buy/sell flow for one token across all reported wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenFlow {
    pub token_address: String,
    pub symbol: String,
    pub buy_amount: Decimal,
    pub buy_value: Decimal,
    pub sell_amount: Decimal,
    pub sell_value: Decimal,
    pub buying_wallets: usize,
    pub selling_wallets: usize,
}

#[derive(Default)]
struct FlowAccumulator {
    buy_amount: Decimal,
    buy_value: Decimal,
    sell_amount: Decimal,
    sell_value: Decimal,
    buyers: HashSet<String>,
    sellers: HashSet<String>,
}

/// Groups changes by token in first-appearance order. Positive changes count
/// as buys; everything else as sells, summed in absolute terms.
pub fn summarize_token_flows(changes: &[BalanceChange], registry: &Registry) -> Result<Vec<TokenFlow>> {
    let mut order: Vec<&str> = Vec::new();
    let mut flows: HashMap<&str, FlowAccumulator> = HashMap::new();

    for change in changes {
        let token = change.token_address.as_str();
        let acc = flows.entry(token).or_insert_with(|| {
            order.push(token);
            FlowAccumulator::default()
        });

        if change.balance_change > Decimal::ZERO {
            acc.buy_amount += change.balance_change;
            acc.buy_value += change.value_change;
            acc.buyers.insert(change.wallet_address.clone());
        } else {
            acc.sell_amount += change.balance_change.abs();
            acc.sell_value += change.value_change.abs();
            acc.sellers.insert(change.wallet_address.clone());
        }
    }

    order
        .into_iter()
        .map(|token| {
            let symbol = registry.token(token)?.symbol.clone();
            let acc = flows.remove(token).unwrap_or_default();
            Ok(TokenFlow {
                token_address: token.to_string(),
                symbol,
                buy_amount: acc.buy_amount,
                buy_value: acc.buy_value,
                sell_amount: acc.sell_amount,
                sell_value: acc.sell_value,
                buying_wallets: acc.buyers.len(),
                selling_wallets: acc.sellers.len(),
            })
        })
        .collect()
}
