use crate::channel::{ChannelCallback, ChannelRegistry, ChannelStatusReport, TransactionRef};
use crate::error::{AppError, Result};
use crate::models::{Transaction, TransactionType};
use crate::store::OrderStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Counters for reconciliation traffic.
#[derive(Debug, Default)]
pub struct ReconciliationMetrics {
    pub results_received: AtomicU64,
    pub outcomes_applied: AtomicU64,
    pub replays_absorbed: AtomicU64,
    pub conflicts_detected: AtomicU64,
    pub transactions_expired: AtomicU64,
    pub orders_expired: AtomicU64,
}

impl ReconciliationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReconciliationMetricsSnapshot {
        ReconciliationMetricsSnapshot {
            results_received: self.results_received.load(Ordering::Relaxed),
            outcomes_applied: self.outcomes_applied.load(Ordering::Relaxed),
            replays_absorbed: self.replays_absorbed.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            transactions_expired: self.transactions_expired.load(Ordering::Relaxed),
            orders_expired: self.orders_expired.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationMetricsSnapshot {
    pub results_received: u64,
    pub outcomes_applied: u64,
    pub replays_absorbed: u64,
    pub conflicts_detected: u64,
    pub transactions_expired: u64,
    pub orders_expired: u64,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub transactions_resolved: u64,
    pub transactions_expired: u64,
    pub orders_expired: u64,
    pub conflicts: u64,
}

/// Applies asynchronous channel results to the ledger and its owning
/// aggregates exactly once, whatever the delivery count or arrival order.
///
/// Callbacks and the active sweep are independent entry points into the same
/// per-order serialization; both funnel through [`resolve_transaction`].
///
/// [`resolve_transaction`]: ReconciliationService::resolve_transaction
pub struct ReconciliationService {
    store: Arc<dyn OrderStore>,
    channels: Arc<ChannelRegistry>,
    metrics: Arc<ReconciliationMetrics>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn OrderStore>, channels: Arc<ChannelRegistry>) -> Self {
        Self {
            store,
            channels,
            metrics: Arc::new(ReconciliationMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ReconciliationMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handles one inbound channel result.
    ///
    /// A channel transaction number may map to several ledger entries (merged
    /// payment); each is resolved independently. A conflicting report on an
    /// already-terminal entry surfaces as `ReconciliationConflict` and leaves
    /// the stored state untouched.
    pub async fn handle_callback(&self, callback: ChannelCallback) -> Result<()> {
        let transactions = self.resolve_reference(&callback.reference).await?;
        let completed_at = callback.completed_at.unwrap_or_else(Utc::now);

        let mut first_conflict: Option<AppError> = None;
        for tx in transactions {
            if callback.channel_record_id.is_some() || callback.channel_transaction_number.is_some()
            {
                self.record_late_channel_refs(&tx.code, &callback).await?;
            }
            match self
                .resolve_transaction(&tx.code, callback.succeeded, completed_at)
                .await
            {
                Ok(()) => {}
                Err(err @ AppError::ReconciliationConflict { .. }) => {
                    if first_conflict.is_none() {
                        first_conflict = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        match first_conflict {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves one ledger entry to a terminal state and applies it to its
    /// owning order, all under the order's lock. Replays are no-ops.
    pub async fn resolve_transaction(
        &self,
        transaction_code: &str,
        succeeded: bool,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.metrics.results_received.fetch_add(1, Ordering::Relaxed);

        // Resolve the owner before locking; the order code never changes.
        let preliminary = self
            .store
            .find_transaction(transaction_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Transaction '{}' not found", transaction_code))
            })?;

        let lock = self.store.order_lock(&preliminary.order_code);
        let _guard = lock.lock_owned().await;

        // Re-read inside the lock; a racing delivery may have resolved it.
        let mut tx = self
            .store
            .find_transaction(transaction_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Transaction '{}' not found", transaction_code))
            })?;

        if tx.is_terminal() {
            if tx.matches_outcome(succeeded) {
                self.metrics.replays_absorbed.fetch_add(1, Ordering::Relaxed);
                info!(transaction = %tx.code, "Duplicate channel result absorbed");
                return Ok(());
            }
            self.metrics.conflicts_detected.fetch_add(1, Ordering::Relaxed);
            let conflict = AppError::ReconciliationConflict {
                transaction_code: tx.code.clone(),
                stored: format!("{:?}", tx.status),
                reported: if succeeded { "SUCCESS" } else { "FAILED" }.to_string(),
            };
            error!(transaction = %tx.code, stored = ?tx.status, reported = succeeded,
                "Conflicting channel result; stored state preserved for manual review");
            return Err(conflict);
        }

        if succeeded {
            tx.succeed(completed_at)?;
        } else {
            tx.fail(completed_at)?;
        }
        self.store.update_transaction(tx.clone()).await?;

        self.apply_to_order(&tx).await?;
        self.metrics.outcomes_applied.fetch_add(1, Ordering::Relaxed);
        info!(transaction = %tx.code, order = %tx.order_code, status = ?tx.status,
            "Channel result applied");
        Ok(())
    }

    /// Active reconciliation pass: queries the channel for every PENDING
    /// entry past its expiry and expires orders past their deadline. Closes
    /// the window left by lost callbacks and crashes between the channel call
    /// and the ledger write.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for tx in self.store.list_pending_past_expiry(now).await? {
            match self.sweep_transaction(&tx, now).await {
                Ok(SweepAction::Resolved) => report.transactions_resolved += 1,
                Ok(SweepAction::Expired) => report.transactions_expired += 1,
                Ok(SweepAction::Left) => {}
                Err(AppError::ReconciliationConflict { .. }) => report.conflicts += 1,
                Err(err) => {
                    // One bad entry never stops the sweep.
                    error!(transaction = %tx.code, error = %err, "Sweep failed on entry");
                }
            }
        }

        for order in self.store.list_orders_past_deadline(now).await? {
            match self.expire_order(&order.code).await {
                Ok(true) => report.orders_expired += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(order = %order.code, error = %err, "Sweep failed to expire order");
                }
            }
        }

        if report.transactions_resolved > 0
            || report.transactions_expired > 0
            || report.orders_expired > 0
            || report.conflicts > 0
        {
            info!(
                resolved = report.transactions_resolved,
                expired = report.transactions_expired,
                orders_expired = report.orders_expired,
                conflicts = report.conflicts,
                "Reconciliation sweep completed"
            );
        }
        Ok(report)
    }

    async fn sweep_transaction(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<SweepAction> {
        let gateway = match self.channels.get(&tx.channel) {
            Ok(gateway) => gateway,
            Err(err) => {
                warn!(transaction = %tx.code, channel = %tx.channel, error = %err,
                    "Channel unavailable during sweep; entry left pending");
                return Ok(SweepAction::Left);
            }
        };

        // No channel record id means the channel may never have registered
        // the attempt at all; ask only when there is something to ask about.
        let status = match &tx.channel_record_id {
            Some(record_id) => match tx.transaction_type {
                TransactionType::Payment => gateway.query_payment_status(record_id).await?,
                TransactionType::Refund => gateway.query_refund_status(record_id).await?,
            },
            None => ChannelStatusReport::NoRecord,
        };

        match status {
            ChannelStatusReport::Success => {
                self.resolve_transaction(&tx.code, true, now).await?;
                Ok(SweepAction::Resolved)
            }
            ChannelStatusReport::Failed => {
                self.resolve_transaction(&tx.code, false, now).await?;
                Ok(SweepAction::Resolved)
            }
            ChannelStatusReport::Processing => Ok(SweepAction::Left),
            ChannelStatusReport::NoRecord => {
                self.expire_transaction(&tx.code, now).await?;
                Ok(SweepAction::Expired)
            }
        }
    }

    /// Expires a PENDING entry the channel has no record of. Order amounts
    /// stay untouched.
    async fn expire_transaction(&self, transaction_code: &str, now: DateTime<Utc>) -> Result<()> {
        let preliminary = self
            .store
            .find_transaction(transaction_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Transaction '{}' not found", transaction_code))
            })?;

        let lock = self.store.order_lock(&preliminary.order_code);
        let _guard = lock.lock_owned().await;

        let mut tx = self
            .store
            .find_transaction(transaction_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Transaction '{}' not found", transaction_code))
            })?;
        if tx.is_terminal() {
            // Raced a late callback; whatever landed first stands.
            return Ok(());
        }

        tx.expire(now)?;
        self.store.update_transaction(tx.clone()).await?;
        self.apply_to_order(&tx).await?;
        self.metrics.transactions_expired.fetch_add(1, Ordering::Relaxed);
        info!(transaction = %tx.code, order = %tx.order_code, "Pending entry expired by sweep");
        Ok(())
    }

    /// Expires an order past its deadline, unless channel money may still be
    /// in flight for it. Returns whether the order was expired.
    async fn expire_order(&self, order_code: &str) -> Result<bool> {
        let lock = self.store.order_lock(order_code);
        let _guard = lock.lock_owned().await;

        let mut order = self
            .store
            .load_order(order_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", order_code)))?;
        if !order.payment_status.accepts_payment() {
            return Ok(false);
        }
        if self.store.has_pending_transactions(order_code).await? {
            return Ok(false);
        }

        order.mark_expired()?;
        self.store.save_order(order).await?;
        self.metrics.orders_expired.fetch_add(1, Ordering::Relaxed);
        info!(order = %order_code, "Order expired past deadline");
        Ok(true)
    }

    /// Applies a terminal transaction to its owning aggregate. Caller holds
    /// the order lock.
    async fn apply_to_order(&self, tx: &Transaction) -> Result<()> {
        let mut order = self
            .store
            .load_order(&tx.order_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", tx.order_code)))?;

        match (tx.status.is_terminal(), tx.matches_outcome(true)) {
            (true, true) => match tx.transaction_type {
                TransactionType::Payment => order.apply_payment_outcome(tx)?,
                TransactionType::Refund => order.apply_refund_outcome(tx)?,
            },
            (true, false) => order.apply_failure_outcome(tx)?,
            (false, _) => {
                return Err(AppError::InvalidState(format!(
                    "Transaction {} is not terminal",
                    tx.code
                )))
            }
        }

        self.store.save_order(order).await?;
        Ok(())
    }

    async fn resolve_reference(&self, reference: &TransactionRef) -> Result<Vec<Transaction>> {
        match reference {
            TransactionRef::Code(code) => {
                let tx = self.store.find_transaction(code).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Transaction '{}' not found", code))
                })?;
                Ok(vec![tx])
            }
            TransactionRef::ChannelTransactionNumber(number) => {
                let transactions = self
                    .store
                    .find_by_channel_transaction_number(number)
                    .await?;
                if transactions.is_empty() {
                    return Err(AppError::NotFound(format!(
                        "No transaction carries channel number '{}'",
                        number
                    )));
                }
                Ok(transactions)
            }
        }
    }

    /// Stores channel refs a callback supplies after initiation omitted them.
    async fn record_late_channel_refs(
        &self,
        transaction_code: &str,
        callback: &ChannelCallback,
    ) -> Result<()> {
        if let Some(mut tx) = self.store.find_transaction(transaction_code).await? {
            if tx.is_pending() {
                tx.record_channel_refs(
                    callback.channel_record_id.clone(),
                    callback.channel_transaction_number.clone(),
                );
                self.store.update_transaction(tx).await?;
            }
        }
        Ok(())
    }
}

enum SweepAction {
    Resolved,
    Expired,
    Left,
}

/// Periodic background sweep.
pub struct SweepJob {
    reconciliation: Arc<ReconciliationService>,
    interval_seconds: u64,
}

impl SweepJob {
    pub fn new(reconciliation: Arc<ReconciliationService>, interval_seconds: u64) -> Self {
        Self {
            reconciliation,
            interval_seconds,
        }
    }

    /// Runs a single sweep pass.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.reconciliation.run_sweep(Utc::now()).await
    }

    /// Starts the sweep in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(self.interval_seconds));

            loop {
                interval.tick().await;

                if let Err(err) = self.reconciliation.run_sweep(Utc::now()).await {
                    error!(error = %err, "Reconciliation sweep failed");
                }
            }
        })
    }
}
