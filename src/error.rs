use thiserror::Error;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input shape: non-positive amount, missing buyer, malformed request.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not legal for the current order or transaction status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A channel-reported amount would push paid past the order target.
    /// Indicates a reconciliation defect that needs manual review.
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Allocation list does not add up to the declared execution total.
    #[error("Allocation mismatch: {0}")]
    AllocationMismatch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Versioned save lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Channel rejected or cannot serve this buyer/operation.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Channel call failed after the ledger entry was written; the entry
    /// stays PENDING and the sweep owns its resolution.
    #[error("Channel error: {0}")]
    Channel(String),

    /// A terminal transaction received a contradicting outcome. Stored state
    /// is preserved; resolution is manual.
    #[error("Reconciliation conflict on transaction {transaction_code}: stored {stored}, reported {reported}")]
    ReconciliationConflict {
        transaction_code: String,
        stored: String,
        reported: String,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Returns true for errors a duplicate-delivery caller may safely ignore.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::ReconciliationConflict { .. })
    }
}
