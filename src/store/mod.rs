pub mod memory;

pub use memory::InMemoryOrderStore;

use crate::error::Result;
use crate::models::{PaymentOrder, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Persistence boundary for orders and their ledger entries.
///
/// `save_order` is versioned: a save against a stale version fails with
/// `Conflict` so read-decide-write sequences on one order stay atomic. The
/// per-order lock from [`OrderStore::order_lock`] serializes mutators on the
/// same order; different orders proceed independently.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: PaymentOrder) -> Result<()>;

    async fn load_order(&self, code: &str) -> Result<Option<PaymentOrder>>;

    async fn list_by_buyer(&self, buyer_id: &str) -> Result<Vec<PaymentOrder>>;

    async fn list_by_linked_business(&self, business_id: &str) -> Result<Vec<PaymentOrder>>;

    /// Persists an order, failing with `Conflict` unless the caller holds the
    /// currently stored version. Returns the order with its bumped version.
    async fn save_order(&self, order: PaymentOrder) -> Result<PaymentOrder>;

    async fn insert_transaction(&self, transaction: Transaction) -> Result<()>;

    async fn update_transaction(&self, transaction: Transaction) -> Result<()>;

    async fn find_transaction(&self, code: &str) -> Result<Option<Transaction>>;

    /// Every ledger entry sharing one channel transaction number; more than
    /// one for a merged payment.
    async fn find_by_channel_transaction_number(&self, number: &str) -> Result<Vec<Transaction>>;

    async fn list_transactions(&self, order_code: &str) -> Result<Vec<Transaction>>;

    async fn has_pending_transactions(&self, order_code: &str) -> Result<bool>;

    /// Sweep input: PENDING entries whose expiry has elapsed.
    async fn list_pending_past_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>>;

    /// Sweep input: payable orders whose deadline has elapsed.
    async fn list_orders_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>>;

    /// Mutual-exclusion scope for one order. Held around local state
    /// transitions only, never across channel calls.
    fn order_lock(&self, code: &str) -> Arc<Mutex<()>>;
}
