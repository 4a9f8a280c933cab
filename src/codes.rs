use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Configuration for business-code generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeGeneratorConfig {
    /// Stable identifier of this node, folded into the code suffix so two
    /// processes never collide.
    pub node_id: String,
}

impl Default for CodeGeneratorConfig {
    fn default() -> Self {
        Self {
            node_id: "payment-engine".to_string(),
        }
    }
}

/// Generates globally unique, lexically sortable business codes.
///
/// Layout: `<prefix>-<utc timestamp, millisecond>-<sequence>-<node suffix>`.
/// The timestamp leads so codes sort by creation time; the per-process
/// sequence disambiguates within a millisecond; the suffix is a SHA-256
/// digest of the node id plus boot entropy.
#[derive(Debug)]
pub struct CodeGenerator {
    node_suffix: String,
    sequence: AtomicU64,
}

impl CodeGenerator {
    pub fn new(config: CodeGeneratorConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(config.node_id.as_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self {
            node_suffix: digest[..6].to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(CodeGeneratorConfig::default())
    }

    /// Code for a new payment order.
    pub fn order_code(&self) -> String {
        self.next("PO")
    }

    /// Code for a new payment transaction.
    pub fn payment_transaction_code(&self) -> String {
        self.next("TX")
    }

    /// Code for a new refund transaction.
    pub fn refund_transaction_code(&self) -> String {
        self.next("RF")
    }

    /// Grouping key shared by every ledger entry of one merged channel call.
    pub fn channel_group_key(&self) -> String {
        self.next("GRP")
    }

    fn next(&self, prefix: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!(
            "{}-{}-{:06}-{}",
            prefix,
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            seq,
            self.node_suffix
        )
    }
}
