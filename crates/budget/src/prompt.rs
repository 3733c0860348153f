//! Final prompt assembly and cost accounting.

use memtier_core::memory::MemoryTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::estimator::TokenEstimator;

const PART_SEPARATOR: &str = "\n\n";

/// Cost of one prompt-construction call, by part. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageBreakdown {
    /// Sum of all parts.
    pub total: usize,
    pub budget: usize,
    /// Tokens per part: `system`, `query`, tier names, and `reserved` when
    /// tokens are held back.
    pub parts: BTreeMap<String, usize>,
    pub budget_exceeded: bool,
}

impl TokenUsageBreakdown {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Add tokens to a part and to the total.
    pub fn add_part(&mut self, name: impl Into<String>, tokens: usize) {
        *self.parts.entry(name.into()).or_insert(0) += tokens;
        self.total += tokens;
    }

    pub fn part(&self, name: &str) -> usize {
        self.parts.get(name).copied().unwrap_or(0)
    }

    pub fn tier(&self, tier: MemoryTier) -> usize {
        self.part(tier.as_str())
    }

    pub fn over_budget(&self) -> bool {
        self.total > self.budget
    }
}

/// A rendered tier section and what it costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSection {
    pub tier: MemoryTier,
    pub text: String,
    pub tokens: usize,
}

impl PromptSection {
    pub fn new(tier: MemoryTier, text: impl Into<String>, tokens: usize) -> Self {
        Self {
            tier,
            text: text.into(),
            tokens,
        }
    }

    /// A section costed by estimating its rendered text.
    pub fn from_text(tier: MemoryTier, text: impl Into<String>, estimator: &TokenEstimator) -> Self {
        let text = text.into();
        let tokens = estimator.estimate(&text);
        Self { tier, text, tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Joins system message, memory sections, and the user query.
#[derive(Debug, Clone)]
pub struct PromptConstructor {
    estimator: TokenEstimator,
    query_prefix: String,
}

impl PromptConstructor {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            query_prefix: "USER: ".into(),
        }
    }

    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query_prefix = prefix.into();
        self
    }

    /// The query as it appears in the prompt.
    pub fn render_query(&self, user_query: &str) -> String {
        format!("{}{}", self.query_prefix, user_query)
    }

    /// Assemble the prompt.
    ///
    /// Order: system message, non-empty sections in the given order, then
    /// the rendered query, joined by blank lines. The system message and the
    /// query are always included in full. Separators are not charged.
    pub fn assemble(
        &self,
        system_message: &str,
        sections: &[PromptSection],
        user_query: &str,
        budget: usize,
    ) -> (String, TokenUsageBreakdown) {
        let mut usage = TokenUsageBreakdown::new(budget);
        let mut parts: Vec<&str> = Vec::with_capacity(sections.len() + 2);

        if !system_message.is_empty() {
            parts.push(system_message);
        }
        usage.add_part("system", self.estimator.estimate(system_message));

        for section in sections.iter().filter(|s| !s.is_empty()) {
            parts.push(&section.text);
            usage.add_part(section.tier.as_str(), section.tokens);
        }

        let query = self.render_query(user_query);
        usage.add_part("query", self.estimator.estimate(&query));
        parts.push(&query);

        let prompt = parts.join(PART_SEPARATOR);
        usage.budget_exceeded = usage.over_budget();
        (prompt, usage)
    }
}
