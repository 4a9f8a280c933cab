pub mod execution;
pub mod reconciliation;

pub use execution::{
    CreateOrderRequest, ExecutePaymentRequest, ExecuteRefundRequest, ExecutionService,
    OrderAllocation, PaymentExecution,
};
pub use reconciliation::{
    ReconciliationMetrics, ReconciliationMetricsSnapshot, ReconciliationService, SweepJob,
    SweepReport,
};
