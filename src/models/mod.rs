pub mod money;
pub mod payment_order;
pub mod transaction;

pub use money::{Money, AMOUNT_SCALE};
pub use payment_order::{
    LinkedBusinessType, PaymentOrder, PaymentStatus, PaymentType, RefundStatus,
};
pub use transaction::{Transaction, TransactionStateMachine, TransactionStatus, TransactionType};
