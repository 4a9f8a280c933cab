use crate::error::{AppError, Result};
use crate::models::{PaymentOrder, Transaction};
use crate::store::OrderStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-memory [`OrderStore`] with versioned saves and a per-order lock
/// registry. Orders are only ever logically deleted.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, PaymentOrder>>,
    transactions: RwLock<HashMap<String, Transaction>>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: PaymentOrder) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.code) {
            return Err(AppError::Conflict(format!(
                "Order '{}' already exists",
                order.code
            )));
        }
        orders.insert(order.code.clone(), order);
        Ok(())
    }

    async fn load_order(&self, code: &str) -> Result<Option<PaymentOrder>> {
        Ok(self.orders.read().await.get(code).cloned())
    }

    async fn list_by_buyer(&self, buyer_id: &str) -> Result<Vec<PaymentOrder>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<PaymentOrder> = orders
            .values()
            .filter(|o| o.buyer_id == buyer_id && !o.deleted)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    async fn list_by_linked_business(&self, business_id: &str) -> Result<Vec<PaymentOrder>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<PaymentOrder> = orders
            .values()
            .filter(|o| o.linked_business_id.as_deref() == Some(business_id) && !o.deleted)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    async fn save_order(&self, mut order: PaymentOrder) -> Result<PaymentOrder> {
        let mut orders = self.orders.write().await;
        let stored = orders.get(&order.code).ok_or_else(|| {
            AppError::NotFound(format!("Order '{}' not found", order.code))
        })?;
        if stored.version != order.version {
            return Err(AppError::Conflict(format!(
                "Order '{}' was modified concurrently (stored version {}, caller version {})",
                order.code, stored.version, order.version
            )));
        }
        order.version += 1;
        orders.insert(order.code.clone(), order.clone());
        Ok(order)
    }

    async fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.code) {
            return Err(AppError::Conflict(format!(
                "Transaction '{}' already exists",
                transaction.code
            )));
        }
        transactions.insert(transaction.code.clone(), transaction);
        Ok(())
    }

    async fn update_transaction(&self, transaction: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if !transactions.contains_key(&transaction.code) {
            return Err(AppError::NotFound(format!(
                "Transaction '{}' not found",
                transaction.code
            )));
        }
        transactions.insert(transaction.code.clone(), transaction);
        Ok(())
    }

    async fn find_transaction(&self, code: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(code).cloned())
    }

    async fn find_by_channel_transaction_number(&self, number: &str) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.channel_transaction_number.as_deref() == Some(number))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    async fn list_transactions(&self, order_code: &str) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.order_code == order_code)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    async fn has_pending_transactions(&self, order_code: &str) -> Result<bool> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .any(|t| t.order_code == order_code && t.is_pending()))
    }

    async fn list_pending_past_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.is_past_expiry(now))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    async fn list_orders_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<PaymentOrder>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<PaymentOrder> = orders
            .values()
            .filter(|o| o.is_past_deadline(now) && !o.deleted)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(matched)
    }

    fn order_lock(&self, code: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        locks
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, PaymentType};
    use rust_decimal_macros::dec;

    fn order(code: &str, buyer: &str) -> PaymentOrder {
        PaymentOrder::create(
            code,
            buyer,
            Money::new(dec!(100)).unwrap(),
            "CNY",
            PaymentType::Advance,
            "tester",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("PO-1", "buyer-1")).await.unwrap();

        let loaded = store.load_order("PO-1").await.unwrap().unwrap();
        assert_eq!(loaded.code, "PO-1");
        assert!(store.load_order("PO-404").await.unwrap().is_none());
        assert!(store.insert_order(order("PO-1", "buyer-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_versioned_save_detects_stale_writer() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("PO-1", "buyer-1")).await.unwrap();

        let first = store.load_order("PO-1").await.unwrap().unwrap();
        let second = first.clone();

        let saved = store.save_order(first).await.unwrap();
        assert_eq!(saved.version, 1);

        // The stale copy still carries version 0.
        let result = store.save_order(second).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_buyer_and_linked_business_queries() {
        let store = InMemoryOrderStore::new();
        store.insert_order(order("PO-1", "buyer-1")).await.unwrap();
        store.insert_order(order("PO-2", "buyer-2")).await.unwrap();
        store
            .insert_order(
                order("PO-3", "buyer-1").with_linked_business(
                    "ORDER-77",
                    crate::models::LinkedBusinessType::Order,
                ),
            )
            .await
            .unwrap();

        let mine = store.list_by_buyer("buyer-1").await.unwrap();
        assert_eq!(mine.len(), 2);

        let linked = store.list_by_linked_business("ORDER-77").await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].code, "PO-3");
    }

    #[tokio::test]
    async fn test_archived_orders_hidden_from_listings() {
        let store = InMemoryOrderStore::new();
        let mut o = order("PO-1", "buyer-1");
        o.cancel("test").unwrap();
        o.archive().unwrap();
        store.insert_order(o).await.unwrap();

        assert!(store.list_by_buyer("buyer-1").await.unwrap().is_empty());
        // Still loadable directly; deletion is logical.
        assert!(store.load_order("PO-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_channel_number_lookup_spans_orders() {
        let store = InMemoryOrderStore::new();
        for (code, order_code) in [("TX-1", "PO-1"), ("TX-2", "PO-2")] {
            let mut tx = Transaction::payment(
                code,
                order_code,
                Money::new(dec!(10)).unwrap(),
                "mock-bank",
                Utc::now() + chrono::Duration::minutes(30),
                "tester",
            );
            tx.record_channel_refs(None, Some("CHN-1".into()));
            store.insert_transaction(tx).await.unwrap();
        }

        let shared = store
            .find_by_channel_transaction_number("CHN-1")
            .await
            .unwrap();
        assert_eq!(shared.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_queries() {
        let store = InMemoryOrderStore::new();
        let mut expired = Transaction::payment(
            "TX-1",
            "PO-1",
            Money::new(dec!(10)).unwrap(),
            "mock-bank",
            Utc::now() - chrono::Duration::minutes(1),
            "tester",
        );
        store.insert_transaction(expired.clone()).await.unwrap();

        assert!(store.has_pending_transactions("PO-1").await.unwrap());
        assert!(!store.has_pending_transactions("PO-2").await.unwrap());

        let due = store.list_pending_past_expiry(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);

        expired.expire(Utc::now()).unwrap();
        store.update_transaction(expired).await.unwrap();
        assert!(!store.has_pending_transactions("PO-1").await.unwrap());
        assert!(store
            .list_pending_past_expiry(Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_order_lock_identity() {
        let store = InMemoryOrderStore::new();
        let a = store.order_lock("PO-1");
        let b = store.order_lock("PO-1");
        let c = store.order_lock("PO-2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
