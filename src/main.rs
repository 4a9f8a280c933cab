use payment_engine::channel::ChannelRegistry;
use payment_engine::codes::{CodeGenerator, CodeGeneratorConfig};
use payment_engine::config::Settings;
use payment_engine::logging::{init_logging, LogConfig, LogFormat};
use payment_engine::services::{ExecutionService, ReconciliationService, SweepJob};
use payment_engine::store::InMemoryOrderStore;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let settings = Settings::new()?;

    init_logging(&LogConfig {
        level: settings.application.log_level.clone(),
        format: LogFormat::from(settings.application.log_format.as_str()),
        ..LogConfig::default()
    });
    info!("Configuration loaded");

    let store = Arc::new(InMemoryOrderStore::new());
    let codes = Arc::new(CodeGenerator::new(CodeGeneratorConfig {
        node_id: settings.codes.node_id.clone(),
    }));

    // Channel backends are registered by the embedding deployment; a bare
    // engine starts with an empty registry.
    let channels = Arc::new(ChannelRegistry::new());
    if channels.ids().is_empty() {
        warn!("No payment channels registered; executions will be rejected");
    }

    let reconciliation = Arc::new(ReconciliationService::new(
        store.clone(),
        channels.clone(),
    ));
    let _execution = ExecutionService::new(
        store,
        channels,
        codes,
        reconciliation.clone(),
        chrono::Duration::minutes(settings.reconciliation.transaction_ttl_minutes),
    );

    let sweep = SweepJob::new(
        reconciliation,
        settings.reconciliation.sweep_interval_seconds,
    );
    let sweep_handle = sweep.start();
    info!(
        interval = settings.reconciliation.sweep_interval_seconds,
        "Reconciliation sweep started"
    );

    info!("Payment engine ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    sweep_handle.abort();

    Ok(())
}
