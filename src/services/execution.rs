use crate::channel::{
    ChannelRegistry, ChannelStatusReport, InitiatePaymentCommand, InitiateRefundCommand,
    PaymentAllocation,
};
use crate::codes::CodeGenerator;
use crate::error::{AppError, Result};
use crate::models::{Money, PaymentOrder, PaymentType, Transaction, TransactionType};
use crate::services::reconciliation::ReconciliationService;
use crate::store::OrderStore;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Request for creating a new payment order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub buyer_id: String,
    pub target_amount: Decimal,
    pub currency: String,
    pub payment_type: PaymentType,
    pub linked_business_id: Option<String>,
    pub linked_business_type: Option<crate::models::LinkedBusinessType>,
    pub deadline: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub note: Option<String>,
    pub created_by: String,
}

/// One order's share of an execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAllocation {
    pub order_code: String,
    pub amount: Decimal,
}

/// Request to collect a total across one or more orders in a single channel
/// call (merged payment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePaymentRequest {
    pub allocations: Vec<OrderAllocation>,
    /// Declared total; must equal the allocation sum exactly.
    pub total_amount: Decimal,
    pub channel: String,
    pub requested_by: String,
}

/// Request to refund part of what one order has collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRefundRequest {
    pub order_code: String,
    pub amount: Decimal,
    pub reason: String,
    /// Payment transaction being reversed; refunds may also stand alone.
    pub original_transaction_code: Option<String>,
    /// Channel override; defaults to the original transaction's channel.
    pub channel: Option<String>,
    pub requested_by: String,
}

/// Outcome of a payment execution: the pending ledger entries plus whatever
/// identifiers the channel returned at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExecution {
    pub group_key: String,
    pub transactions: Vec<Transaction>,
    pub channel_transaction_number: Option<String>,
    pub channel_record_id: Option<String>,
}

/// Orchestrates payment and refund initiation against the channel gateway.
///
/// Per-order locks are held only around local validation and ledger writes;
/// the channel call itself happens with no locks held, and its asynchronous
/// result flows back through the [`ReconciliationService`].
pub struct ExecutionService {
    store: Arc<dyn OrderStore>,
    channels: Arc<ChannelRegistry>,
    codes: Arc<CodeGenerator>,
    reconciliation: Arc<ReconciliationService>,
    transaction_ttl: Duration,
}

impl ExecutionService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        channels: Arc<ChannelRegistry>,
        codes: Arc<CodeGenerator>,
        reconciliation: Arc<ReconciliationService>,
        transaction_ttl: Duration,
    ) -> Self {
        Self {
            store,
            channels,
            codes,
            reconciliation,
            transaction_ttl,
        }
    }

    /// Creates a new PENDING order with a generated code.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PaymentOrder> {
        let target = Money::new(request.target_amount)?;
        let mut order = PaymentOrder::create(
            self.codes.order_code(),
            request.buyer_id,
            target,
            request.currency,
            request.payment_type,
            request.created_by,
        )?;

        if let (Some(id), Some(kind)) = (request.linked_business_id, request.linked_business_type) {
            order = order.with_linked_business(id, kind);
        }
        if let Some(deadline) = request.deadline {
            order = order.with_deadline(deadline);
        }
        if let Some(priority) = request.priority {
            order = order.with_priority(priority);
        }
        if let Some(note) = request.note {
            order = order.with_note(note);
        }

        self.store.insert_order(order.clone()).await?;
        info!(
            order = %order.code,
            buyer = %crate::logging::mask_sensitive(&order.buyer_id, 2),
            target = %order.target_amount,
            "Payment order created"
        );
        Ok(order)
    }

    /// Initiates one merged channel payment across the allocated orders.
    ///
    /// All validation and ledger writes complete before the channel call. If
    /// the channel call then fails, the PENDING entries stay behind for the
    /// sweep; nothing ever looks settled without a channel confirmation.
    pub async fn execute_payment(&self, request: ExecutePaymentRequest) -> Result<PaymentExecution> {
        let allocations = self.validate_allocations(&request)?;
        let gateway = self.channels.get(&request.channel)?;

        // Lock orders in code order so concurrent merged executions of
        // overlapping order sets cannot deadlock.
        let mut sorted: Vec<(String, Money)> = allocations;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(sorted.len());
        for (code, _) in &sorted {
            guards.push(self.store.order_lock(code).lock_owned().await);
        }

        let mut buyer: Option<String> = None;
        let mut currency: Option<String> = None;
        for (code, amount) in &sorted {
            let order = self
                .store
                .load_order(code)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", code)))?;
            if !order.payment_status.accepts_payment() {
                return Err(AppError::InvalidState(format!(
                    "Order {} is not payable in status {:?}",
                    code, order.payment_status
                )));
            }
            if *amount > order.pending_amount() {
                return Err(AppError::InvalidState(format!(
                    "Allocation {} for order {} exceeds its pending amount {}",
                    amount,
                    code,
                    order.pending_amount()
                )));
            }
            match &buyer {
                None => buyer = Some(order.buyer_id.clone()),
                Some(b) if *b != order.buyer_id => {
                    return Err(AppError::Validation(
                        "A merged payment can only span orders of one buyer".to_string(),
                    ));
                }
                _ => {}
            }
            match &currency {
                None => currency = Some(order.currency.clone()),
                Some(c) if *c != order.currency => {
                    return Err(AppError::Validation(
                        "A merged payment can only span orders of one currency".to_string(),
                    ));
                }
                _ => {}
            }
        }
        let buyer = buyer.expect("validated non-empty allocations");
        let currency = currency.expect("validated non-empty allocations");

        if !gateway.is_available_for(&buyer).await {
            return Err(AppError::ChannelUnavailable(format!(
                "Channel '{}' is not available for buyer '{}'",
                request.channel, buyer
            )));
        }

        // Ledger entries are written PENDING before the outbound call; the
        // reconciliation sweep closes the gap if we crash in between.
        let group_key = self.codes.channel_group_key();
        let expires_at = Utc::now() + self.transaction_ttl;
        let mut transactions = Vec::with_capacity(sorted.len());
        for (code, amount) in &sorted {
            let tx = Transaction::payment(
                self.codes.payment_transaction_code(),
                code.clone(),
                *amount,
                request.channel.clone(),
                expires_at,
                request.requested_by.clone(),
            )
            .with_business_reference(group_key.clone());
            self.store.insert_transaction(tx.clone()).await?;
            transactions.push(tx);
        }
        drop(guards);

        let total = Money::new(request.total_amount)?;
        let command = InitiatePaymentCommand {
            group_key: group_key.clone(),
            buyer_id: buyer,
            total_amount: total,
            currency,
            allocations: sorted
                .iter()
                .map(|(code, amount)| PaymentAllocation {
                    order_code: code.clone(),
                    amount: *amount,
                })
                .collect(),
            expires_at,
        };

        let initiation = match gateway.initiate_payment(command).await {
            Ok(initiation) => initiation,
            Err(err) => {
                warn!(group = %group_key, channel = %request.channel, error = %err,
                    "Channel initiation failed; ledger entries stay PENDING for the sweep");
                return Err(err);
            }
        };

        for tx in &mut transactions {
            tx.record_channel_refs(
                initiation.channel_record_id.clone(),
                initiation.channel_transaction_number.clone(),
            );
            self.store.update_transaction(tx.clone()).await?;
        }

        info!(group = %group_key, channel = %request.channel,
            orders = transactions.len(), "Merged payment initiated");

        self.apply_immediate_status(&transactions, initiation.immediate_status)
            .await?;

        Ok(PaymentExecution {
            group_key,
            channel_transaction_number: initiation.channel_transaction_number,
            channel_record_id: initiation.channel_record_id,
            transactions,
        })
    }

    /// Initiates a refund scoped to a single order.
    pub async fn execute_refund(&self, request: ExecuteRefundRequest) -> Result<Transaction> {
        let amount = Money::new(request.amount)?;

        let original = match &request.original_transaction_code {
            Some(code) => Some(self.store.find_transaction(code).await?.ok_or_else(|| {
                AppError::NotFound(format!("Original transaction '{}' not found", code))
            })?),
            None => None,
        };
        if let Some(original) = &original {
            if original.order_code != request.order_code {
                return Err(AppError::Validation(format!(
                    "Original transaction {} belongs to order {}, not {}",
                    original.code, original.order_code, request.order_code
                )));
            }
            if original.transaction_type != TransactionType::Payment {
                return Err(AppError::Validation(
                    "Refunds can only reverse PAYMENT transactions".to_string(),
                ));
            }
        }
        let channel_id = match (&request.channel, &original) {
            (Some(channel), _) => channel.clone(),
            (None, Some(original)) => original.channel.clone(),
            (None, None) => {
                return Err(AppError::Validation(
                    "Refund needs a channel or an original transaction to derive one".to_string(),
                ))
            }
        };
        let gateway = self.channels.get(&channel_id)?;

        let lock = self.store.order_lock(&request.order_code);
        let guard = lock.lock_owned().await;

        let order = self
            .store
            .load_order(&request.order_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Order '{}' not found", request.order_code))
            })?;
        if amount > order.refundable_amount() {
            return Err(AppError::InvalidState(format!(
                "Refund of {} exceeds refundable amount {} on order {}",
                amount,
                order.refundable_amount(),
                order.code
            )));
        }

        let mut tx = Transaction::refund(
            self.codes.refund_transaction_code(),
            request.order_code.clone(),
            amount,
            channel_id,
            Utc::now() + self.transaction_ttl,
            request.requested_by,
        )
        .with_remark(request.reason.clone());
        if let Some(original) = &original {
            tx = tx.with_original_transaction(original.code.clone());
        }
        self.store.insert_transaction(tx.clone()).await?;
        drop(guard);

        let command = InitiateRefundCommand {
            transaction_code: tx.code.clone(),
            order_code: tx.order_code.clone(),
            buyer_id: order.buyer_id,
            amount,
            currency: order.currency,
            original_channel_record_id: original.and_then(|o| o.channel_record_id),
            reason: request.reason,
        };

        let initiation = match gateway.initiate_refund(command).await {
            Ok(initiation) => initiation,
            Err(err) => {
                warn!(transaction = %tx.code, error = %err,
                    "Refund initiation failed; ledger entry stays PENDING for the sweep");
                return Err(err);
            }
        };

        tx.record_channel_refs(
            initiation.channel_record_id.clone(),
            initiation.channel_transaction_number.clone(),
        );
        self.store.update_transaction(tx.clone()).await?;
        info!(transaction = %tx.code, order = %tx.order_code, "Refund initiated");

        self.apply_immediate_status(std::slice::from_ref(&tx), initiation.immediate_status)
            .await?;

        self.store
            .find_transaction(&tx.code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction '{}' not found", tx.code)))
    }

    /// Cancels an order. Rejected while any of its transactions is still
    /// PENDING, so a cancel can never race an unresolved channel call.
    pub async fn cancel_order(&self, order_code: &str, reason: impl Into<String>) -> Result<PaymentOrder> {
        let lock = self.store.order_lock(order_code);
        let _guard = lock.lock_owned().await;

        let mut order = self
            .store
            .load_order(order_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", order_code)))?;

        if self.store.has_pending_transactions(order_code).await? {
            return Err(AppError::InvalidState(format!(
                "Order {} has in-flight transactions and cannot be cancelled",
                order_code
            )));
        }

        order.cancel(reason)?;
        let order = self.store.save_order(order).await?;
        info!(order = %order.code, "Order cancelled");
        Ok(order)
    }

    /// Logically deletes a terminally-settled order.
    pub async fn archive_order(&self, order_code: &str) -> Result<PaymentOrder> {
        let lock = self.store.order_lock(order_code);
        let _guard = lock.lock_owned().await;

        let mut order = self
            .store
            .load_order(order_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", order_code)))?;
        order.archive()?;
        self.store.save_order(order).await
    }

    fn validate_allocations(&self, request: &ExecutePaymentRequest) -> Result<Vec<(String, Money)>> {
        if request.allocations.is_empty() {
            return Err(AppError::Validation(
                "Execution needs at least one order allocation".to_string(),
            ));
        }

        let mut validated = Vec::with_capacity(request.allocations.len());
        let mut sum = Decimal::ZERO;
        for allocation in &request.allocations {
            let amount = Money::new(allocation.amount)?;
            if validated
                .iter()
                .any(|(code, _): &(String, Money)| code == &allocation.order_code)
            {
                return Err(AppError::AllocationMismatch(format!(
                    "Order {} is allocated more than once",
                    allocation.order_code
                )));
            }
            sum += allocation.amount;
            validated.push((allocation.order_code.clone(), amount));
        }

        if sum != request.total_amount {
            return Err(AppError::AllocationMismatch(format!(
                "Allocations sum to {} but declared total is {}",
                sum, request.total_amount
            )));
        }
        Ok(validated)
    }

    /// Some channels settle synchronously; feed their terminal initiation
    /// status straight through the reconciliation path instead of waiting on
    /// a callback that may never come.
    async fn apply_immediate_status(
        &self,
        transactions: &[Transaction],
        status: Option<ChannelStatusReport>,
    ) -> Result<()> {
        let succeeded = match status {
            Some(ChannelStatusReport::Success) => true,
            Some(ChannelStatusReport::Failed) => false,
            _ => return Ok(()),
        };
        for tx in transactions {
            self.reconciliation
                .resolve_transaction(&tx.code, succeeded, Utc::now())
                .await?;
        }
        Ok(())
    }
}
