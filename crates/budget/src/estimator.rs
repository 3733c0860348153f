//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token by default.
//! This approximation is accurate within ~10% for BPE tokenizers on
//! English text. Characters are Unicode scalar values, not bytes, so
//! non-ASCII text is not over-counted.

use memtier_config::EstimatorConfig;
use memtier_core::error::BudgetError;
use memtier_core::memory::Memory;
use serde::{Deserialize, Serialize};

/// Approximates the model cost of text and memories. Stateless and cheap
/// to copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenEstimator {
    chars_per_token: f32,
    memory_overhead: usize,
    count_metadata: bool,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            memory_overhead: 5,
            count_metadata: true,
        }
    }
}

impl TokenEstimator {
    /// Create an estimator with the given character ratio and default
    /// per-memory overhead.
    pub fn new(chars_per_token: f32) -> Result<Self, BudgetError> {
        if !chars_per_token.is_finite() || chars_per_token <= 0.0 {
            return Err(BudgetError::InvalidEstimator(format!(
                "chars_per_token must be > 0, got {chars_per_token}"
            )));
        }
        Ok(Self {
            chars_per_token,
            ..Self::default()
        })
    }

    pub fn from_config(config: &EstimatorConfig) -> Result<Self, BudgetError> {
        Ok(Self::new(config.chars_per_token)?
            .with_memory_overhead(config.memory_overhead)
            .with_metadata(config.count_metadata))
    }

    /// Fixed cost added to every memory for its surrounding formatting.
    pub fn with_memory_overhead(mut self, overhead: usize) -> Self {
        self.memory_overhead = overhead;
        self
    }

    /// Whether non-empty metadata is charged as serialized JSON.
    pub fn with_metadata(mut self, count: bool) -> Self {
        self.count_metadata = count;
        self
    }

    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }

    pub fn memory_overhead(&self) -> usize {
        self.memory_overhead
    }

    /// Estimate the token count for a string.
    ///
    /// Zero for the empty string, otherwise at least one. Rounds up.
    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        let tokens = (chars as f64 / f64::from(self.chars_per_token)).ceil() as usize;
        tokens.max(1)
    }

    /// Estimate the cost of one memory: content, metadata, and overhead.
    pub fn estimate_memory(&self, memory: &Memory) -> usize {
        let mut tokens = self.estimate(&memory.content) + self.memory_overhead;
        if self.count_metadata && !memory.metadata.is_empty() {
            let json = serde_json::to_string(&memory.metadata).unwrap_or_default();
            tokens += self.estimate(&json);
        }
        tokens
    }

    /// Estimate tokens for a slice of memories.
    pub fn estimate_memories(&self, memories: &[Memory]) -> usize {
        memories.iter().map(|m| self.estimate_memory(m)).sum()
    }

    /// Largest number of characters guaranteed to cost at most `tokens`.
    pub fn chars_for(&self, tokens: usize) -> usize {
        (tokens as f64 * f64::from(self.chars_per_token)).floor() as usize
    }
}
