use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{stream, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::{Config, FailurePolicy};
use crate::db::SnapshotStore;
use crate::detector::{ChangeDetector, SignificancePolicy, TradeDeduplicator};
use crate::error::{AppError, FetchError, Result};
use crate::fetcher::{BalanceFetcher, FetchedBalances, FetchedTrades, TradeFetcher};
use crate::rotator::KeyRotator;
use crate::snapshot::SnapshotAligner;
use crate::state::{AliasFilter, Registry};
use crate::summary::summarize_token_flows;
use crate::types::{
    BalanceReport, CycleEvent, CyclePhase, RawBalanceRow, Snapshot, TradeReport, Wallet,
    WalletFailure,
};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Receives cycle progress. Wallet-start events arrive in submission order.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &CycleEvent);
}

/// Default sink: writes every event to the tracing log.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_event(&self, event: &CycleEvent) {
        match event {
            CycleEvent::Phase(phase) => info!(phase = %phase, "Cycle phase: {phase}"),
            CycleEvent::WalletStarted { alias, index, total } => {
                info!(wallet = %alias, "Checking wallet {}/{}: {alias}", index + 1, total)
            }
            CycleEvent::WalletFailed { alias, error } => {
                warn!(wallet = %alias, "Could not check wallet {alias}: {error}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Max wallets fetched at once.
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub significance: SignificancePolicy,
    pub trade_aliases: AliasFilter,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.fetch_concurrency.max(1),
            fetch_timeout: cfg.fetch_timeout,
            failure_policy: cfg.failure_policy,
            significance: SignificancePolicy::new(
                cfg.significance_threshold,
                cfg.native_token_address.clone(),
            ),
            trade_aliases: AliasFilter::new(cfg.trade_wallet_aliases.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconciliationEngine
// ---------------------------------------------------------------------------

/// Runs balance and trade reconciliation cycles against a per-cycle registry.
pub struct ReconciliationEngine {
    store: Arc<dyn SnapshotStore>,
    balance_fetcher: Arc<dyn BalanceFetcher>,
    trade_fetcher: Arc<dyn TradeFetcher>,
    rotator: KeyRotator,
    detector: ChangeDetector,
    settings: EngineSettings,
    progress: Arc<dyn ProgressSink>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        balance_fetcher: Arc<dyn BalanceFetcher>,
        trade_fetcher: Arc<dyn TradeFetcher>,
        rotator: KeyRotator,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            balance_fetcher,
            trade_fetcher,
            rotator,
            detector: ChangeDetector::new(settings.significance.clone()),
            settings,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Snapshot every balance-tracked wallet, diff against the stored previous
    /// snapshot, persist the new one and return the significant changes.
    pub async fn check_balances(&self, registry: &Registry) -> Result<BalanceReport> {
        self.enter(CyclePhase::Idle);
        match self.run_balance_cycle(registry).await {
            Ok(report) => {
                self.enter(CyclePhase::Done);
                Ok(report)
            }
            Err(e) => {
                self.enter(CyclePhase::Failed);
                error!("Balance cycle failed: {e}");
                Err(e)
            }
        }
    }

    /// Report trades on trade-tracked wallets that were never reported before.
    /// Any fetch failure aborts the cycle.
    pub async fn check_trades(&self, registry: &Registry) -> Result<TradeReport> {
        self.enter(CyclePhase::Idle);
        match self.run_trade_cycle(registry).await {
            Ok(report) => {
                self.enter(CyclePhase::Done);
                Ok(report)
            }
            Err(e) => {
                self.enter(CyclePhase::Failed);
                error!("Trade cycle failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_balance_cycle(&self, registry: &Registry) -> Result<BalanceReport> {
        let wallets = registry.balance_wallets(&self.settings.trade_aliases);
        let wallets_total = wallets.len();

        self.enter(CyclePhase::FetchingBalances);
        let mut fetched: Vec<(String, Vec<RawBalanceRow>)> = Vec::with_capacity(wallets_total);
        let mut failures: Vec<WalletFailure> = Vec::new();
        let mut dropped_rows = 0usize;

        let mut results = stream::iter(wallets.iter().enumerate())
            .map(|(index, wallet)| {
                let credential = self.dispatch(wallet, index, wallets_total);
                async move {
                    let outcome = self
                        .timed(self.balance_fetcher.fetch_balances(&wallet.address, &credential))
                        .await;
                    (wallet, outcome)
                }
            })
            .buffered(self.settings.concurrency);

        while let Some((wallet, outcome)) = results.next().await {
            match outcome {
                Ok(FetchedBalances { rows, dropped }) => {
                    dropped_rows += dropped;
                    fetched.push((wallet.address.clone(), rows));
                }
                Err(source) => {
                    self.progress.on_event(&CycleEvent::WalletFailed {
                        alias: wallet.alias.clone(),
                        error: source.to_string(),
                    });
                    if self.settings.failure_policy == FailurePolicy::AbortCycle {
                        return Err(AppError::Fetch {
                            wallet: wallet.address.clone(),
                            source,
                        });
                    }
                    failures.push(WalletFailure {
                        wallet_address: wallet.address.clone(),
                        alias: wallet.alias.clone(),
                        error: source.to_string(),
                    });
                }
            }
        }
        self.enter(CyclePhase::Aligning);
        let aligner = SnapshotAligner::new(registry.token_addresses());
        let checked: Vec<String> = fetched.iter().map(|(w, _)| w.clone()).collect();
        let current = aligner.align_current(&fetched);
        let previous = self.store.previous_snapshot().await?;
        // Re-derive history onto this cycle's keys so stale tokens or skipped
        // wallets never produce a structural mismatch.
        let previous_rows = aligner.key_space(&checked).densify(&previous.rows);

        self.enter(CyclePhase::Diffing);
        let changes = self.detector.detect(&current, &previous_rows)?;
        let significant = self.detector.significant(changes);

        self.enter(CyclePhase::Persisting);
        let snapshot = Snapshot {
            taken_at: Utc::now(),
            wallets: checked,
            rows: current
                .into_iter()
                .filter(|r| r.balance > Decimal::ZERO)
                .collect(),
        };
        let checked_at = self
            .store
            .append_snapshot(&snapshot)
            .await
            .map_err(AppError::persistence)?;

        let token_flows = summarize_token_flows(&significant, registry)?;

        info!(
            wallets_checked = snapshot.wallets.len(),
            wallets_failed = failures.len(),
            rows_persisted = snapshot.rows.len(),
            significant = significant.len(),
            dropped_rows,
            "Balance cycle complete: {} significant changes across {}/{} wallets",
            significant.len(),
            snapshot.wallets.len(),
            wallets_total,
        );

        Ok(BalanceReport {
            changes: significant,
            previous_check_time: previous.previous_check_time,
            checked_at,
            wallets_total,
            wallets_checked: snapshot.wallets.len(),
            failures,
            dropped_rows,
            token_flows,
        })
    }

    async fn run_trade_cycle(&self, registry: &Registry) -> Result<TradeReport> {
        let wallets = registry.trade_wallets(&self.settings.trade_aliases);
        let total = wallets.len();

        self.enter(CyclePhase::FetchingTrades);
        let fetched: Vec<FetchedTrades> = stream::iter(wallets.iter().enumerate())
            .map(|(index, wallet)| {
                let credential = self.dispatch(wallet, index, total);
                async move {
                    self.timed(self.trade_fetcher.fetch_trades(&wallet.address, &credential))
                        .await
                        .map_err(|source| AppError::Fetch {
                            wallet: wallet.address.clone(),
                            source,
                        })
                }
            })
            .buffered(self.settings.concurrency)
            .try_collect()
            .await?;

        let dropped_rows: usize = fetched.iter().map(|f| f.dropped).sum();
        let trades: Vec<_> = fetched.into_iter().flat_map(|f| f.trades).collect();

        self.enter(CyclePhase::Deduplicating);
        let mut dedup = TradeDeduplicator::new(self.store.persisted_trade_hashes().await?);
        let fresh = dedup.filter_new(trades);

        self.enter(CyclePhase::Persisting);
        let inserted = self
            .store
            .append_trades(&fresh)
            .await
            .map_err(AppError::persistence)?;

        info!(
            wallets_checked = total,
            new_trades = fresh.len(),
            inserted,
            dropped_rows,
            "Trade cycle complete: {} new trades across {total} wallets",
            fresh.len(),
        );

        Ok(TradeReport {
            trades: fresh,
            wallets_checked: total,
            dropped_rows,
        })
    }

    /// Announce a wallet and pick its credential. Runs at dispatch, in order.
    fn dispatch(&self, wallet: &Wallet, index: usize, total: usize) -> String {
        self.progress.on_event(&CycleEvent::WalletStarted {
            alias: wallet.alias.clone(),
            index,
            total,
        });
        self.rotator.next().to_string()
    }

    async fn timed<T, F>(&self, fut: F) -> std::result::Result<T, FetchError>
    where
        F: Future<Output = std::result::Result<T, FetchError>>,
    {
        match tokio::time::timeout(self.settings.fetch_timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(self.settings.fetch_timeout)),
        }
    }

    fn enter(&self, phase: CyclePhase) {
        self.progress.on_event(&CycleEvent::Phase(phase));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
