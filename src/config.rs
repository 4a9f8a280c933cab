use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub reconciliation: ReconciliationSettings,
    pub codes: CodeSettings,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationSettings {
    /// Seconds between active sweep passes.
    pub sweep_interval_seconds: u64,
    /// Minutes a transaction may stay PENDING before the sweep picks it up.
    pub transaction_ttl_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct CodeSettings {
    pub node_id: String,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
