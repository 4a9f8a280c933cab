use crate::error::{AppError, Result};
use crate::models::Money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One order's share of a merged channel payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub order_code: String,
    pub amount: Money,
}

/// Command for a single outbound payment call, possibly merged over several
/// orders. `total_amount` always equals the sum of the allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentCommand {
    /// Grouping key shared by every ledger entry of this call.
    pub group_key: String,
    pub buyer_id: String,
    pub total_amount: Money,
    pub currency: String,
    pub allocations: Vec<PaymentAllocation>,
    pub expires_at: DateTime<Utc>,
}

/// Command for an outbound refund call, always scoped to a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRefundCommand {
    pub transaction_code: String,
    pub order_code: String,
    pub buyer_id: String,
    pub amount: Money,
    pub currency: String,
    /// Channel record of the payment being reversed, when known.
    pub original_channel_record_id: Option<String>,
    pub reason: String,
}

/// What the channel hands back when it accepts an initiation. Every field may
/// be absent at call time and supplied later through a callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelInitiation {
    pub channel_record_id: Option<String>,
    pub channel_transaction_number: Option<String>,
    /// Some channels settle synchronously and report a terminal outcome at
    /// initiation time.
    pub immediate_status: Option<ChannelStatusReport>,
}

/// Channel-side view of a payment or refund attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatusReport {
    Success,
    Failed,
    Processing,
    /// The channel never saw this attempt; the sweep expires the entry.
    NoRecord,
}

/// Identifies a transaction in an inbound channel result: either our own
/// ledger code or the channel's transaction number, which a merged payment
/// shares across orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionRef {
    Code(String),
    ChannelTransactionNumber(String),
}

/// Inbound asynchronous channel result, as delivered by the transport layer.
/// May arrive more than once and out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCallback {
    pub reference: TransactionRef,
    pub succeeded: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Channel refs supplied late, after initiation returned without them.
    pub channel_record_id: Option<String>,
    pub channel_transaction_number: Option<String>,
}

impl ChannelCallback {
    pub fn success(reference: TransactionRef) -> Self {
        Self {
            reference,
            succeeded: true,
            completed_at: Some(Utc::now()),
            channel_record_id: None,
            channel_transaction_number: None,
        }
    }

    pub fn failure(reference: TransactionRef) -> Self {
        Self {
            reference,
            succeeded: false,
            completed_at: Some(Utc::now()),
            channel_record_id: None,
            channel_transaction_number: None,
        }
    }
}

/// Capability contract implemented once per external payment rail. The core
/// depends only on this trait; wire protocols live behind it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Stable identifier used to select this channel at execution time.
    fn id(&self) -> &str;

    async fn initiate_payment(&self, command: InitiatePaymentCommand) -> Result<ChannelInitiation>;

    async fn query_payment_status(&self, record_id: &str) -> Result<ChannelStatusReport>;

    async fn initiate_refund(&self, command: InitiateRefundCommand) -> Result<ChannelInitiation>;

    async fn query_refund_status(&self, record_id: &str) -> Result<ChannelStatusReport>;

    async fn is_available_for(&self, buyer_id: &str) -> bool;
}

/// Registry of channel backends keyed by channel identifier.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn ChannelGateway>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn ChannelGateway>) {
        self.channels.insert(gateway.id().to_string(), gateway);
    }

    pub fn get(&self, channel_id: &str) -> Result<Arc<dyn ChannelGateway>> {
        self.channels.get(channel_id).cloned().ok_or_else(|| {
            AppError::ChannelUnavailable(format!("No channel registered as '{}'", channel_id))
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }
}
