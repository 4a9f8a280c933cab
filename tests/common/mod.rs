use async_trait::async_trait;
use chrono::Duration;
use payment_engine::channel::{
    ChannelGateway, ChannelInitiation, ChannelRegistry, ChannelStatusReport,
    InitiatePaymentCommand, InitiateRefundCommand,
};
use payment_engine::codes::CodeGenerator;
use payment_engine::error::{AppError, Result};
use payment_engine::models::{PaymentOrder, PaymentType};
use payment_engine::services::{
    CreateOrderRequest, ExecutionService, ReconciliationService,
};
use payment_engine::store::{InMemoryOrderStore, OrderStore};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const CHANNEL_ID: &str = "stub-bank";

/// Scriptable channel backend that records every outbound call.
pub struct StubChannel {
    pub available: AtomicBool,
    pub reject_initiation: AtomicBool,
    /// Template returned by both initiation calls.
    pub initiation: Mutex<ChannelInitiation>,
    /// Status returned by both query calls.
    pub query_status: Mutex<ChannelStatusReport>,
    pub payment_calls: Mutex<Vec<InitiatePaymentCommand>>,
    pub refund_calls: Mutex<Vec<InitiateRefundCommand>>,
}

impl StubChannel {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            reject_initiation: AtomicBool::new(false),
            initiation: Mutex::new(ChannelInitiation {
                channel_record_id: Some("REC-1".to_string()),
                channel_transaction_number: Some("CHN-1".to_string()),
                immediate_status: None,
            }),
            query_status: Mutex::new(ChannelStatusReport::NoRecord),
            payment_calls: Mutex::new(Vec::new()),
            refund_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_immediate_status(&self, status: Option<ChannelStatusReport>) {
        self.initiation.lock().unwrap().immediate_status = status;
    }

    pub fn set_query_status(&self, status: ChannelStatusReport) {
        *self.query_status.lock().unwrap() = status;
    }
}

#[async_trait]
impl ChannelGateway for StubChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    async fn initiate_payment(&self, command: InitiatePaymentCommand) -> Result<ChannelInitiation> {
        if self.reject_initiation.load(Ordering::SeqCst) {
            return Err(AppError::Channel("stub channel down".to_string()));
        }
        self.payment_calls.lock().unwrap().push(command);
        Ok(self.initiation.lock().unwrap().clone())
    }

    async fn query_payment_status(&self, _record_id: &str) -> Result<ChannelStatusReport> {
        Ok(*self.query_status.lock().unwrap())
    }

    async fn initiate_refund(&self, command: InitiateRefundCommand) -> Result<ChannelInitiation> {
        if self.reject_initiation.load(Ordering::SeqCst) {
            return Err(AppError::Channel("stub channel down".to_string()));
        }
        self.refund_calls.lock().unwrap().push(command);
        Ok(self.initiation.lock().unwrap().clone())
    }

    async fn query_refund_status(&self, _record_id: &str) -> Result<ChannelStatusReport> {
        Ok(*self.query_status.lock().unwrap())
    }

    async fn is_available_for(&self, _buyer_id: &str) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Fully wired engine against an in-memory store and the stub channel.
pub struct TestEngine {
    pub store: Arc<InMemoryOrderStore>,
    pub channel: Arc<StubChannel>,
    pub execution: ExecutionService,
    pub reconciliation: Arc<ReconciliationService>,
}

pub fn setup() -> TestEngine {
    let store = Arc::new(InMemoryOrderStore::new());
    let channel = Arc::new(StubChannel::new());

    let mut registry = ChannelRegistry::new();
    registry.register(channel.clone());
    let registry = Arc::new(registry);

    let reconciliation = Arc::new(ReconciliationService::new(
        store.clone() as Arc<dyn OrderStore>,
        registry.clone(),
    ));
    let execution = ExecutionService::new(
        store.clone() as Arc<dyn OrderStore>,
        registry,
        Arc::new(CodeGenerator::with_default_config()),
        reconciliation.clone(),
        Duration::minutes(30),
    );

    TestEngine {
        store,
        channel,
        execution,
        reconciliation,
    }
}

pub async fn create_order(engine: &TestEngine, buyer: &str, target: Decimal) -> PaymentOrder {
    engine
        .execution
        .create_order(CreateOrderRequest {
            buyer_id: buyer.to_string(),
            target_amount: target,
            currency: "CNY".to_string(),
            payment_type: PaymentType::Advance,
            linked_business_id: None,
            linked_business_type: None,
            deadline: None,
            priority: None,
            note: None,
            created_by: "tester".to_string(),
        })
        .await
        .expect("Failed to create order")
}
