use rust_decimal::Decimal;

use crate::error::{AppError, Result};
use crate::types::{BalanceChange, BalanceRow};

/// Which deltas are worth reporting. Both fields come from configuration.
#[derive(Debug, Clone)]
pub struct SignificancePolicy {
    /// Exclusive lower bound on `abs(balance_change)`.
    pub threshold: Decimal,
    /// Base-asset token, never significant.
    pub native_token: String,
}

impl SignificancePolicy {
    pub fn new(threshold: Decimal, native_token: impl Into<String>) -> Self {
        Self {
            threshold,
            native_token: native_token.into(),
        }
    }

    pub fn is_significant(&self, change: &BalanceChange) -> bool {
        change.balance_change.abs() > self.threshold && change.token_address != self.native_token
    }
}

pub struct ChangeDetector {
    policy: SignificancePolicy,
}

impl ChangeDetector {
    pub fn new(policy: SignificancePolicy) -> Self {
        Self { policy }
    }

    /// One change per key, row-wise over two aligned snapshots.
    ///
    /// Both inputs must carry the same (wallet, token) sequence. The check is
    /// structural: any difference in length or key order is a fatal alignment
    /// error, never a silent truncation.
    pub fn detect(&self, current: &[BalanceRow], previous: &[BalanceRow]) -> Result<Vec<BalanceChange>> {
        if current.len() != previous.len() {
            return Err(AppError::AlignmentMismatch {
                current: current.len(),
                previous: previous.len(),
            });
        }

        current
            .iter()
            .zip(previous)
            .enumerate()
            .map(|(index, (cur, prev))| {
                if cur.key() != prev.key() {
                    return Err(AppError::KeyMismatch {
                        index,
                        current: format!("{}/{}", cur.wallet_address, cur.token_address),
                        previous: format!("{}/{}", prev.wallet_address, prev.token_address),
                    });
                }
                Ok(BalanceChange {
                    wallet_address: cur.wallet_address.clone(),
                    token_address: cur.token_address.clone(),
                    previous_balance: prev.balance,
                    current_balance: cur.balance,
                    balance_change: cur.balance - prev.balance,
                    value_change: cur.value - prev.value,
                })
            })
            .collect()
    }

    /// Keeps significant changes, preserving order.
    pub fn significant(&self, changes: Vec<BalanceChange>) -> Vec<BalanceChange> {
        changes
            .into_iter()
            .filter(|c| self.policy.is_significant(c))
            .collect()
    }
}
