//! Error taxonomy for the racing engine.

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// `Conflict` is raised when a slot has already been claimed by another
/// invocation; callers on the settlement path treat it as a benign no-op.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    /// Coin ledger failure after retries were exhausted.
    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
