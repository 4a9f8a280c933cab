use crate::error::{AppError, Result};
use crate::models::{Money, Transaction, TransactionStatus, TransactionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the collected money is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Advance,
    Final,
    Other,
    CreditRepayment,
}

/// Kind of business record a payment order may be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkedBusinessType {
    Order,
    CreditRecord,
    DeliveryNote,
}

/// Payment-side lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    /// True while the order may still receive payment transactions.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::PartiallyPaid)
    }

    /// Terminal for payment purposes; refunds may still follow from PAID.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Cancelled | PaymentStatus::Expired
        )
    }
}

/// Refund-side lifecycle, tracked independently of [`PaymentStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    None,
    PartiallyRefunded,
    FullyRefunded,
}

/// Aggregate root for one request to collect a target amount from a buyer.
///
/// Paid and refunded amounts only ever change by applying a settled ledger
/// transaction through the `apply_*` methods; nothing outside the aggregate
/// writes them. Invariants held after every apply:
/// `0 <= paid <= target` and `0 <= refunded <= paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Globally unique business code, immutable once assigned.
    pub code: String,
    pub buyer_id: String,
    pub target_amount: Money,
    pub paid_amount: Money,
    pub refunded_amount: Money,
    pub currency: String,
    pub payment_type: PaymentType,
    pub payment_status: PaymentStatus,
    pub refund_status: RefundStatus,
    pub linked_business_id: Option<String>,
    pub linked_business_type: Option<LinkedBusinessType>,
    /// Past this instant the sweep may expire an unpaid order.
    pub deadline: Option<DateTime<Utc>>,
    pub priority: i32,
    pub note: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped by the store on save.
    pub version: u64,
    /// Logical delete flag; orders are never physically removed.
    pub deleted: bool,
}

impl PaymentOrder {
    /// Creates a new PENDING order. The target amount is fixed for the
    /// order's lifetime.
    pub fn create(
        code: impl Into<String>,
        buyer_id: impl Into<String>,
        target_amount: Money,
        currency: impl Into<String>,
        payment_type: PaymentType,
        created_by: impl Into<String>,
    ) -> Result<Self> {
        let buyer_id = buyer_id.into();
        if buyer_id.trim().is_empty() {
            return Err(AppError::Validation("Buyer is required".to_string()));
        }
        let now = Utc::now();
        Ok(Self {
            code: code.into(),
            buyer_id,
            target_amount,
            paid_amount: Money::zero(),
            refunded_amount: Money::zero(),
            currency: currency.into(),
            payment_type,
            payment_status: PaymentStatus::Pending,
            refund_status: RefundStatus::None,
            linked_business_id: None,
            linked_business_type: None,
            deadline: None,
            priority: 0,
            note: None,
            cancel_reason: None,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            version: 0,
            deleted: false,
        })
    }

    pub fn with_linked_business(
        mut self,
        business_id: impl Into<String>,
        business_type: LinkedBusinessType,
    ) -> Self {
        self.linked_business_id = Some(business_id.into());
        self.linked_business_type = Some(business_type);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Amount still owed; computed here, never trusted from callers.
    pub fn pending_amount(&self) -> Money {
        self.target_amount.saturating_subtract(self.paid_amount)
    }

    /// Net amount still refundable: paid minus already refunded.
    pub fn refundable_amount(&self) -> Money {
        self.paid_amount.saturating_subtract(self.refunded_amount)
    }

    /// Applies a settled SUCCESS payment transaction to this order.
    ///
    /// An amount that would push paid past the target is rejected with
    /// `AmountOverflow` instead of being clamped: it means the channel and
    /// the ledger disagree and someone has to look.
    pub fn apply_payment_outcome(&mut self, transaction: &Transaction) -> Result<()> {
        self.check_ownership(transaction)?;
        if transaction.transaction_type != TransactionType::Payment {
            return Err(AppError::InvalidState(
                "Only PAYMENT transactions can be applied as payment outcomes".to_string(),
            ));
        }
        if transaction.status != TransactionStatus::Success {
            return Err(AppError::InvalidState(format!(
                "Payment outcome requires a terminal SUCCESS transaction, got {:?}",
                transaction.status
            )));
        }
        if !self.payment_status.accepts_payment() {
            return Err(AppError::InvalidState(format!(
                "Order {} cannot accept payment in status {:?}",
                self.code, self.payment_status
            )));
        }

        let new_paid = self.paid_amount.add(transaction.amount);
        if new_paid > self.target_amount {
            return Err(AppError::AmountOverflow(format!(
                "Applying {} to order {} would raise paid to {} past target {}",
                transaction.amount, self.code, new_paid, self.target_amount
            )));
        }

        self.paid_amount = new_paid;
        self.payment_status = if self.paid_amount == self.target_amount {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a settled SUCCESS refund transaction to this order.
    pub fn apply_refund_outcome(&mut self, transaction: &Transaction) -> Result<()> {
        self.check_ownership(transaction)?;
        if transaction.transaction_type != TransactionType::Refund {
            return Err(AppError::InvalidState(
                "Only REFUND transactions can be applied as refund outcomes".to_string(),
            ));
        }
        if transaction.status != TransactionStatus::Success {
            return Err(AppError::InvalidState(format!(
                "Refund outcome requires a terminal SUCCESS transaction, got {:?}",
                transaction.status
            )));
        }
        if transaction.amount > self.refundable_amount() {
            return Err(AppError::InvalidState(format!(
                "Refund of {} exceeds refundable amount {} on order {}",
                transaction.amount,
                self.refundable_amount(),
                self.code
            )));
        }

        self.refunded_amount = self.refunded_amount.add(transaction.amount);
        self.refund_status = if self.refunded_amount == self.paid_amount {
            RefundStatus::FullyRefunded
        } else {
            RefundStatus::PartiallyRefunded
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Closes the ledger entry's effect on this order for a FAILED or EXPIRED
    /// transaction: amounts and status stay untouched so a retry can proceed.
    pub fn apply_failure_outcome(&mut self, transaction: &Transaction) -> Result<()> {
        self.check_ownership(transaction)?;
        match transaction.status {
            TransactionStatus::Failed | TransactionStatus::Expired => {
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(AppError::InvalidState(format!(
                "Failure outcome requires a FAILED or EXPIRED transaction, got {:?}",
                other
            ))),
        }
    }

    /// Cancels the order. The caller must have verified that no transaction
    /// for this order is still PENDING.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if !self.payment_status.accepts_payment() {
            return Err(AppError::InvalidState(format!(
                "Order {} cannot be cancelled in status {:?}",
                self.code, self.payment_status
            )));
        }
        self.payment_status = PaymentStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Deadline sweep transition for orders never (fully) paid in time.
    pub fn mark_expired(&mut self) -> Result<()> {
        if !self.payment_status.accepts_payment() {
            return Err(AppError::InvalidState(format!(
                "Order {} cannot expire in status {:?}",
                self.code, self.payment_status
            )));
        }
        self.payment_status = PaymentStatus::Expired;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Logical delete of a terminally-settled order.
    pub fn archive(&mut self) -> Result<()> {
        if !self.payment_status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Order {} cannot be archived in status {:?}",
                self.code, self.payment_status
            )));
        }
        self.deleted = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.payment_status.accepts_payment()
            && self.deadline.map(|d| now > d).unwrap_or(false)
    }

    fn check_ownership(&self, transaction: &Transaction) -> Result<()> {
        if transaction.order_code != self.code {
            return Err(AppError::InvalidState(format!(
                "Transaction {} belongs to order {}, not {}",
                transaction.code, transaction.order_code, self.code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(target: rust_decimal::Decimal) -> PaymentOrder {
        PaymentOrder::create(
            "PO-001",
            "buyer-1",
            Money::new(target).unwrap(),
            "CNY",
            PaymentType::Advance,
            "tester",
        )
        .unwrap()
    }

    fn success_payment(amount: rust_decimal::Decimal) -> Transaction {
        let mut tx = Transaction::payment(
            "TX-001",
            "PO-001",
            Money::new(amount).unwrap(),
            "mock-bank",
            Utc::now() + chrono::Duration::minutes(30),
            "tester",
        );
        tx.succeed(Utc::now()).unwrap();
        tx
    }

    fn success_refund(amount: rust_decimal::Decimal) -> Transaction {
        let mut tx = Transaction::refund(
            "RF-001",
            "PO-001",
            Money::new(amount).unwrap(),
            "mock-bank",
            Utc::now() + chrono::Duration::minutes(30),
            "tester",
        );
        tx.succeed(Utc::now()).unwrap();
        tx
    }

    #[test]
    fn test_create_requires_buyer() {
        let result = PaymentOrder::create(
            "PO-002",
            "  ",
            Money::new(dec!(10)).unwrap(),
            "CNY",
            PaymentType::Final,
            "tester",
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_create_starts_pending() {
        let o = order(dec!(100));
        assert_eq!(o.payment_status, PaymentStatus::Pending);
        assert_eq!(o.refund_status, RefundStatus::None);
        assert!(o.paid_amount.is_zero());
        assert_eq!(o.pending_amount(), Money::new(dec!(100)).unwrap());
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut o = order(dec!(100));
        o.apply_payment_outcome(&success_payment(dec!(60))).unwrap();
        assert_eq!(o.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(o.pending_amount(), Money::new(dec!(40)).unwrap());

        o.apply_payment_outcome(&success_payment(dec!(40))).unwrap();
        assert_eq!(o.payment_status, PaymentStatus::Paid);
        assert!(o.pending_amount().is_zero());
    }

    #[test]
    fn test_overflow_rejected_not_clamped() {
        let mut o = order(dec!(100));
        o.apply_payment_outcome(&success_payment(dec!(60))).unwrap();

        let result = o.apply_payment_outcome(&success_payment(dec!(50)));
        assert!(matches!(result, Err(AppError::AmountOverflow(_))));
        // Nothing applied.
        assert_eq!(o.paid_amount, Money::new(dec!(60)).unwrap());
        assert_eq!(o.payment_status, PaymentStatus::PartiallyPaid);
    }

    #[test]
    fn test_payment_rejected_after_cancel() {
        let mut o = order(dec!(100));
        o.cancel("buyer withdrew").unwrap();
        let result = o.apply_payment_outcome(&success_payment(dec!(10)));
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        assert!(o.paid_amount.is_zero());
    }

    #[test]
    fn test_pending_transaction_not_applicable() {
        let mut o = order(dec!(100));
        let pending = Transaction::payment(
            "TX-001",
            "PO-001",
            Money::new(dec!(10)).unwrap(),
            "mock-bank",
            Utc::now(),
            "tester",
        );
        assert!(o.apply_payment_outcome(&pending).is_err());
    }

    #[test]
    fn test_foreign_transaction_rejected() {
        let mut o = order(dec!(100));
        let mut tx = Transaction::payment(
            "TX-009",
            "PO-OTHER",
            Money::new(dec!(10)).unwrap(),
            "mock-bank",
            Utc::now(),
            "tester",
        );
        tx.succeed(Utc::now()).unwrap();
        assert!(o.apply_payment_outcome(&tx).is_err());
    }

    #[test]
    fn test_refund_bounds() {
        let mut o = order(dec!(100));
        o.apply_payment_outcome(&success_payment(dec!(60))).unwrap();

        o.apply_refund_outcome(&success_refund(dec!(30))).unwrap();
        assert_eq!(o.refunded_amount, Money::new(dec!(30)).unwrap());
        assert_eq!(o.refund_status, RefundStatus::PartiallyRefunded);

        // 30 + 40 = 70 > paid 60.
        let result = o.apply_refund_outcome(&success_refund(dec!(40)));
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        assert_eq!(o.refunded_amount, Money::new(dec!(30)).unwrap());

        o.apply_refund_outcome(&success_refund(dec!(30))).unwrap();
        assert_eq!(o.refund_status, RefundStatus::FullyRefunded);
    }

    #[test]
    fn test_failure_outcome_leaves_amounts() {
        let mut o = order(dec!(100));
        let mut tx = Transaction::payment(
            "TX-001",
            "PO-001",
            Money::new(dec!(60)).unwrap(),
            "mock-bank",
            Utc::now(),
            "tester",
        );
        tx.fail(Utc::now()).unwrap();
        o.apply_failure_outcome(&tx).unwrap();
        assert!(o.paid_amount.is_zero());
        assert_eq!(o.payment_status, PaymentStatus::Pending);
        assert_eq!(o.pending_amount(), Money::new(dec!(100)).unwrap());
    }

    #[test]
    fn test_cancel_only_while_payable() {
        let mut o = order(dec!(100));
        o.apply_payment_outcome(&success_payment(dec!(100))).unwrap();
        assert!(matches!(
            o.cancel("too late"),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn test_expire_and_archive() {
        let mut o = order(dec!(100));
        assert!(!o.is_past_deadline(Utc::now()));
        o.deadline = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(o.is_past_deadline(Utc::now()));

        o.mark_expired().unwrap();
        assert_eq!(o.payment_status, PaymentStatus::Expired);
        assert!(o.mark_expired().is_err());

        o.archive().unwrap();
        assert!(o.deleted);
    }

    #[test]
    fn test_invariants_after_every_apply() {
        let mut o = order(dec!(100));
        for amount in [dec!(20), dec!(30), dec!(50)] {
            o.apply_payment_outcome(&success_payment(amount)).unwrap();
            assert!(o.paid_amount <= o.target_amount);
            assert!(o.refunded_amount <= o.paid_amount);
        }
        for amount in [dec!(40), dec!(60)] {
            o.apply_refund_outcome(&success_refund(amount)).unwrap();
            assert!(o.refunded_amount <= o.paid_amount);
        }
    }
}
