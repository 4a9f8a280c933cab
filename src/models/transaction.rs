use crate::error::{AppError, Result};
use crate::models::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Collects money from the buyer towards an order.
    Payment,
    /// Returns previously collected money for a single order.
    Refund,
}

/// Status of a transaction in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created alongside the outbound channel call, awaiting resolution.
    Pending,
    /// Channel confirmed the money moved.
    Success,
    /// Channel confirmed the attempt failed.
    Failed,
    /// Pending past its deadline with no channel record; closed by the sweep.
    Expired,
}

impl TransactionStatus {
    /// Returns true if the transaction is in a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Transaction state machine. Terminal states have no outgoing transitions;
/// a transaction resolves at most once.
#[derive(Debug, Clone)]
pub struct TransactionStateMachine;

impl TransactionStateMachine {
    pub fn valid_transitions(current: TransactionStatus) -> Vec<TransactionStatus> {
        match current {
            TransactionStatus::Pending => vec![
                TransactionStatus::Success,
                TransactionStatus::Failed,
                TransactionStatus::Expired,
            ],
            TransactionStatus::Success => vec![],
            TransactionStatus::Failed => vec![],
            TransactionStatus::Expired => vec![],
        }
    }

    pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
        Self::valid_transitions(from).contains(&to)
    }

    pub fn transition(from: TransactionStatus, to: TransactionStatus) -> Result<TransactionStatus> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(AppError::InvalidState(format!(
                "Invalid transaction transition from {:?} to {:?}",
                from, to
            )))
        }
    }
}

/// One attempt, via one channel, to move money for one payment order.
///
/// Several transactions may share a `channel_transaction_number` when a single
/// channel call pays multiple orders (merged payment); each is still applied
/// to its own order independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub code: String,
    /// Code of the owning payment order.
    pub order_code: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Money,
    /// Identifier of the channel this attempt goes through.
    pub channel: String,
    /// Channel-side record id, absent until the channel supplies it.
    pub channel_record_id: Option<String>,
    /// Channel-side transaction number; shared across a merged payment.
    pub channel_transaction_number: Option<String>,
    /// For refunds, the payment transaction being reversed.
    pub original_transaction_code: Option<String>,
    /// External business reference, e.g. a refund-request id.
    pub business_reference: Option<String>,
    pub remark: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Pending past this instant becomes a sweep candidate.
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Creates a pending payment transaction.
    pub fn payment(
        code: impl Into<String>,
        order_code: impl Into<String>,
        amount: Money,
        channel: impl Into<String>,
        expires_at: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            order_code: order_code.into(),
            transaction_type: TransactionType::Payment,
            status: TransactionStatus::Pending,
            amount,
            channel: channel.into(),
            channel_record_id: None,
            channel_transaction_number: None,
            original_transaction_code: None,
            business_reference: None,
            remark: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            expires_at,
            completed_at: None,
        }
    }

    /// Creates a pending refund transaction.
    pub fn refund(
        code: impl Into<String>,
        order_code: impl Into<String>,
        amount: Money,
        channel: impl Into<String>,
        expires_at: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            transaction_type: TransactionType::Refund,
            ..Self::payment(code, order_code, amount, channel, expires_at, created_by)
        }
    }

    pub fn with_original_transaction(mut self, original_code: impl Into<String>) -> Self {
        self.original_transaction_code = Some(original_code.into());
        self
    }

    pub fn with_business_reference(mut self, reference: impl Into<String>) -> Self {
        self.business_reference = Some(reference.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Records channel identifiers as soon as the channel supplies them.
    pub fn record_channel_refs(
        &mut self,
        record_id: Option<String>,
        transaction_number: Option<String>,
    ) {
        if record_id.is_some() {
            self.channel_record_id = record_id;
        }
        if transaction_number.is_some() {
            self.channel_transaction_number = transaction_number;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True once this pending entry is eligible for the active sweep.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now > self.expires_at
    }

    /// True when an already-terminal status matches a reported outcome, i.e.
    /// the report is an idempotent replay rather than a conflict.
    pub fn matches_outcome(&self, success: bool) -> bool {
        match self.status {
            TransactionStatus::Success => success,
            TransactionStatus::Failed | TransactionStatus::Expired => !success,
            TransactionStatus::Pending => false,
        }
    }

    /// Marks the transaction successful. Legal only from PENDING.
    pub fn succeed(&mut self, completed_at: DateTime<Utc>) -> Result<()> {
        self.status = TransactionStateMachine::transition(self.status, TransactionStatus::Success)?;
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Marks the transaction failed. Legal only from PENDING.
    pub fn fail(&mut self, completed_at: DateTime<Utc>) -> Result<()> {
        self.status = TransactionStateMachine::transition(self.status, TransactionStatus::Failed)?;
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Expires the transaction. Legal only from PENDING.
    pub fn expire(&mut self, completed_at: DateTime<Utc>) -> Result<()> {
        self.status = TransactionStateMachine::transition(self.status, TransactionStatus::Expired)?;
        self.completed_at = Some(completed_at);
        Ok(())
    }
}
