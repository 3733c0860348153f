//! Error types for the memtier domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::memory::MemoryTier;

/// The top-level error type for all memtier operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Budget engine errors ---
    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Configuration errors raised by the budget engine before any selection
/// work begins. Over-budget outcomes are never errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BudgetError {
    #[error("Token budget must be non-negative, got {0}")]
    NegativeBudget(i64),

    #[error("Unknown selector: {0} (expected \"priority\" or \"relevance\")")]
    UnknownSelector(String),

    #[error(
        "Unknown adaptation strategy: {0} (expected \"reduce\", \"summarize\" or \"prioritize_tier\")"
    )]
    UnknownStrategy(String),

    #[error("Unknown memory tier: {0}")]
    UnknownTier(String),

    #[error("Invalid {name}: {value} (must be a finite, non-negative number)")]
    InvalidWeight { name: &'static str, value: f32 },

    #[error("Relevance threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),

    #[error("Tier allocation for {tier} must be within [0, 1], got {value}")]
    InvalidAllocation { tier: MemoryTier, value: f32 },

    #[error("Summary ratio must be within (0, 1], got {0}")]
    InvalidRatio(f32),

    #[error("Tier {0} appears more than once in the section order")]
    DuplicateSection(MemoryTier),

    #[error("Memory {id} has importance {value} outside [0, 1]")]
    InvalidImportance { id: String, value: f32 },

    #[error("Invalid estimator setting: {0}")]
    InvalidEstimator(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Corrupted record at {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_error_displays_correctly() {
        let err = Error::Budget(BudgetError::NegativeBudget(-5));
        assert!(err.to_string().contains("-5"));
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn unknown_strategy_lists_choices() {
        let err = BudgetError::UnknownStrategy("shrink".into());
        let msg = err.to_string();
        assert!(msg.contains("shrink"));
        assert!(msg.contains("prioritize_tier"));
    }

    #[test]
    fn store_error_converts_into_top_level() {
        let err: Error = StoreError::NotFound("mem_1".into()).into();
        assert!(matches!(err, Error::Store(StoreError::NotFound(_))));
        assert!(err.to_string().contains("mem_1"));
    }
}
