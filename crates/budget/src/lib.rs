//! # memtier Budget
//!
//! Token-budgeted prompt construction: estimate costs, select memories per
//! tier, shrink over-budget selections, and assemble the final prompt.
//!
//! The engine is synchronous and pure. It never reads or writes a store;
//! callers hand it candidate memories already split by tier.
//!
//! ```text
//! TokenBudgetManager::construct_prompt
//!   ├─ TokenEstimator        fixed cost, per-memory cost
//!   ├─ MemorySelector        greedy fill per tier (priority | relevance)
//!   ├─ AdaptationStrategy    reduce | summarize | prioritize_tier, chained
//!   ├─ MemoryFormatter       per-tier templates and section titles
//!   └─ PromptConstructor     system, sections, query + usage breakdown
//! ```

pub mod adaptation;
pub mod estimator;
pub mod format;
pub mod manager;
pub mod prompt;
pub mod rules;
pub mod selection;
pub mod summarizer;

pub use adaptation::{AdaptContext, Adaptation, AdaptationStrategy, Selection, strategy_for};
pub use estimator::TokenEstimator;
pub use format::{MemoryFormatter, MemoryTemplate};
pub use manager::{PromptOptions, PromptRequest, PromptResult, TokenBudgetManager};
pub use prompt::{PromptConstructor, PromptSection, TokenUsageBreakdown};
pub use rules::{BudgetDefaults, BudgetRules, ComponentRule};
pub use selection::{MemorySelector, PriorityWeights, keyword_relevance};
pub use summarizer::{ExtractiveSummarizer, SummarizeError, Summarizer};
