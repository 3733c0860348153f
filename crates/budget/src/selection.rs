//! Memory selection: pick the subset of a tier's candidates that fits a
//! token sub-budget.
//!
//! Both selectors rank candidates and then fill greedily: a candidate that
//! would overflow is skipped (never truncated) and the scan continues with
//! cheaper, lower-ranked candidates. Exact knapsack is not a goal;
//! determinism and monotonic preference are.

use chrono::{DateTime, Utc};
use memtier_core::error::BudgetError;
use memtier_core::memory::Memory;
use memtier_core::strategy::SelectorKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::estimator::TokenEstimator;

/// Weights of the priority score. They need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub recency: f32,
    pub importance: f32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency: 0.5,
            importance: 0.5,
        }
    }
}

impl PriorityWeights {
    pub fn new(recency: f32, importance: f32) -> Result<Self, BudgetError> {
        let weights = Self {
            recency,
            importance,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), BudgetError> {
        for (name, value) in [
            ("recency_weight", self.recency),
            ("importance_weight", self.importance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(BudgetError::InvalidWeight { name, value });
            }
        }
        Ok(())
    }

    /// `recency_weight * recency + importance_weight * importance`.
    pub fn score(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        f64::from(self.recency) * recency(memory, now)
            + f64::from(self.importance) * f64::from(memory.importance)
    }

    /// Ordering that places the higher-priority memory first.
    ///
    /// Equal scores go to the earlier `created_at`; callers break any
    /// remaining tie by input position.
    pub fn compare(&self, a: &Memory, b: &Memory, now: DateTime<Utc>) -> Ordering {
        self.score(b, now)
            .total_cmp(&self.score(a, now))
            .then(a.created_at.cmp(&b.created_at))
    }
}

/// `1 / (1 + hours since last access)`, in (0, 1]. Accesses in the future
/// count as "just now".
pub fn recency(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let millis = (now - memory.last_accessed_at).num_milliseconds().max(0);
    let hours = millis as f64 / 3_600_000.0;
    1.0 / (1.0 + hours)
}

pub fn validate_threshold(threshold: f32) -> Result<(), BudgetError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(BudgetError::InvalidThreshold(threshold));
    }
    Ok(())
}

/// Ranks and admits candidates within a token budget.
#[derive(Debug, Clone)]
pub enum MemorySelector {
    /// Weighted recency + importance.
    Priority { weights: PriorityWeights },
    /// Caller-supplied relevance per memory id; missing ids score 0.0.
    Relevance {
        scores: HashMap<String, f32>,
        threshold: f32,
    },
}

impl MemorySelector {
    pub fn priority(weights: PriorityWeights) -> Self {
        Self::Priority { weights }
    }

    pub fn relevance(scores: HashMap<String, f32>, threshold: f32) -> Result<Self, BudgetError> {
        validate_threshold(threshold)?;
        Ok(Self::Relevance { scores, threshold })
    }

    pub fn kind(&self) -> SelectorKind {
        match self {
            Self::Priority { .. } => SelectorKind::Priority,
            Self::Relevance { .. } => SelectorKind::Relevance,
        }
    }

    /// Whether a candidate takes part in ranking at all.
    pub fn is_eligible(&self, memory: &Memory) -> bool {
        match self {
            Self::Priority { .. } => true,
            Self::Relevance { threshold, .. } => self.relevance_of(memory) >= *threshold,
        }
    }

    fn relevance_of(&self, memory: &Memory) -> f32 {
        match self {
            Self::Relevance { scores, .. } => scores.get(&memory.id).copied().unwrap_or(0.0),
            Self::Priority { .. } => 0.0,
        }
    }

    /// Indices of eligible candidates, best first.
    pub fn rank(&self, candidates: &[Memory], now: DateTime<Utc>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..candidates.len())
            .filter(|&i| self.is_eligible(&candidates[i]))
            .collect();
        // sort_by is stable, so input position breaks the remaining ties
        match self {
            Self::Priority { weights } => {
                order.sort_by(|&a, &b| weights.compare(&candidates[a], &candidates[b], now));
            }
            Self::Relevance { .. } => {
                order.sort_by(|&a, &b| {
                    self.relevance_of(&candidates[b])
                        .total_cmp(&self.relevance_of(&candidates[a]))
                });
            }
        }
        order
    }

    /// Select the candidates that fit `max_tokens`.
    ///
    /// The result keeps the input order of the admitted candidates; ranking
    /// decides membership only.
    pub fn select(
        &self,
        candidates: &[Memory],
        max_tokens: usize,
        estimator: &TokenEstimator,
        now: DateTime<Utc>,
    ) -> Vec<Memory> {
        self.select_by(candidates, max_tokens, |m| estimator.estimate_memory(m), now)
    }

    /// [`select`](Self::select) with a caller-supplied cost per memory.
    pub fn select_by(
        &self,
        candidates: &[Memory],
        max_tokens: usize,
        cost_of: impl Fn(&Memory) -> usize,
        now: DateTime<Utc>,
    ) -> Vec<Memory> {
        let mut used = 0usize;
        let mut admitted = Vec::new();

        for index in self.rank(candidates, now) {
            let memory = &candidates[index];
            let cost = cost_of(memory);
            if used + cost <= max_tokens {
                used += cost;
                admitted.push(index);
            } else {
                tracing::debug!(
                    memory_id = %memory.id,
                    cost,
                    used,
                    max_tokens,
                    "Skipping memory that would overflow the budget"
                );
            }
        }

        admitted.sort_unstable();
        admitted.into_iter().map(|i| candidates[i].clone()).collect()
    }
}

/// Keyword-overlap relevance (Jaccard similarity of lower-cased words)
/// between a query and each memory, keyed by memory id.
pub fn keyword_relevance(query: &str, memories: &[Memory]) -> HashMap<String, f32> {
    let query_words = words(query);
    memories
        .iter()
        .map(|memory| {
            let memory_words = words(&memory.content);
            let union = query_words.union(&memory_words).count();
            let score = if union == 0 {
                0.0
            } else {
                query_words.intersection(&memory_words).count() as f32 / union as f32
            };
            (memory.id.clone(), score)
        })
        .collect()
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{base_time, estimator, sized};
    use chrono::Duration;
    use memtier_core::memory::MemoryTier;

    fn ids(memories: &[Memory]) -> Vec<&str> {
        memories.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn recency_decays_with_hours() {
        let now = base_time();
        let fresh = sized("a", MemoryTier::Working, 1);
        let stale = sized("b", MemoryTier::Working, 1).with_last_accessed_at(now - Duration::hours(1));
        assert_eq!(recency(&fresh, now), 1.0);
        assert!((recency(&stale, now) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weights_must_be_non_negative() {
        assert!(PriorityWeights::new(0.7, 0.3).is_ok());
        assert!(PriorityWeights::new(2.0, 3.0).is_ok());
        assert!(matches!(
            PriorityWeights::new(-0.1, 0.5),
            Err(BudgetError::InvalidWeight { name: "recency_weight", .. })
        ));
        assert!(PriorityWeights::new(0.5, f32::INFINITY).is_err());
    }

    #[test]
    fn selection_fits_budget() {
        let candidates: Vec<Memory> = (0..10)
            .map(|i| sized(&format!("m{i}"), MemoryTier::ShortTerm, 10 + i))
            .collect();
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            50,
            &estimator(),
            base_time(),
        );
        assert!(estimator().estimate_memories(&selected) <= 50);
        assert!(!selected.is_empty());
    }

    #[test]
    fn custom_cost_decides_fit() {
        let candidates: Vec<Memory> = (0..4)
            .map(|i| sized(&format!("m{i}"), MemoryTier::Working, 10))
            .collect();
        let selector = MemorySelector::priority(PriorityWeights::default());
        assert_eq!(selector.select(&candidates, 40, &estimator(), base_time()).len(), 4);

        let doubled = selector.select_by(&candidates, 40, |m| 2 * estimator().estimate_memory(m), base_time());
        assert_eq!(ids(&doubled), vec!["m0", "m1"]);
    }

    #[test]
    fn oversized_single_item_yields_empty() {
        let candidates = vec![sized("big", MemoryTier::Working, 500)];
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            100,
            &estimator(),
            base_time(),
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn higher_importance_wins() {
        let candidates = vec![
            sized("low", MemoryTier::Working, 60).with_importance(0.2),
            sized("high", MemoryTier::Working, 60).with_importance(0.9),
        ];
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            100,
            &estimator(),
            base_time(),
        );
        assert_eq!(ids(&selected), vec!["high"]);
    }

    #[test]
    fn tie_goes_to_earlier_created() {
        let now = base_time();
        let later = sized("later", MemoryTier::Working, 600).at(now - Duration::minutes(5));
        let earlier = sized("earlier", MemoryTier::Working, 600).at(now - Duration::minutes(30));
        // Same last access so the scores are equal
        let candidates = vec![
            later.with_last_accessed_at(now),
            earlier.with_last_accessed_at(now),
        ];
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            1000,
            &estimator(),
            now,
        );
        assert_eq!(ids(&selected), vec!["earlier"]);
    }

    #[test]
    fn skips_overflowing_and_keeps_scanning() {
        let candidates = vec![
            sized("first", MemoryTier::Working, 70).with_importance(0.9),
            sized("big", MemoryTier::Working, 50).with_importance(0.8),
            sized("small", MemoryTier::Working, 20).with_importance(0.1),
        ];
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            100,
            &estimator(),
            base_time(),
        );
        assert_eq!(ids(&selected), vec!["first", "small"]);
    }

    #[test]
    fn result_keeps_input_order() {
        let candidates = vec![
            sized("a", MemoryTier::ShortTerm, 10).with_importance(0.1),
            sized("b", MemoryTier::ShortTerm, 10).with_importance(0.9),
            sized("c", MemoryTier::ShortTerm, 10).with_importance(0.5),
        ];
        let selected = MemorySelector::priority(PriorityWeights::default()).select(
            &candidates,
            100,
            &estimator(),
            base_time(),
        );
        assert_eq!(ids(&selected), vec!["a", "b", "c"]);
    }

    #[test]
    fn priority_selection_is_deterministic() {
        let candidates: Vec<Memory> = (0..20)
            .map(|i| sized(&format!("m{i}"), MemoryTier::Working, 5 + (i * 7) % 13))
            .collect();
        let selector = MemorySelector::priority(PriorityWeights::new(0.3, 0.7).unwrap());
        let first = selector.select(&candidates, 60, &estimator(), base_time());
        for _ in 0..5 {
            assert_eq!(selector.select(&candidates, 60, &estimator(), base_time()), first);
        }
    }

    #[test]
    fn relevance_filters_below_threshold() {
        let candidates = vec![
            sized("a", MemoryTier::LongTerm, 10),
            sized("b", MemoryTier::LongTerm, 10),
            sized("c", MemoryTier::LongTerm, 10),
        ];
        let scores = HashMap::from([("a".to_string(), 0.05), ("b".to_string(), 0.8)]);
        let selector = MemorySelector::relevance(scores, 0.1).unwrap();
        assert!(!selector.is_eligible(&candidates[2]));
        let selected = selector.select(&candidates, 100, &estimator(), base_time());
        assert_eq!(ids(&selected), vec!["b"]);
    }

    #[test]
    fn relevance_prefers_higher_scores() {
        let candidates = vec![
            sized("a", MemoryTier::LongTerm, 60),
            sized("b", MemoryTier::LongTerm, 60),
        ];
        let scores = HashMap::from([("a".to_string(), 0.3), ("b".to_string(), 0.9)]);
        let selector = MemorySelector::relevance(scores, 0.1).unwrap();
        assert_eq!(selector.rank(&candidates, base_time()), vec![1, 0]);
        let selected = selector.select(&candidates, 100, &estimator(), base_time());
        assert_eq!(ids(&selected), vec!["b"]);
    }

    #[test]
    fn relevance_threshold_validated() {
        assert!(matches!(
            MemorySelector::relevance(HashMap::new(), 1.5),
            Err(BudgetError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn keyword_overlap_scores() {
        let memories = vec![
            Memory::new("The user likes Rust programming", MemoryTier::LongTerm).with_id("rust"),
            Memory::new("Weather is sunny today", MemoryTier::LongTerm).with_id("weather"),
        ];
        let scores = keyword_relevance("rust programming tips", &memories);
        assert!(scores["rust"] > scores["weather"]);
        assert_eq!(scores["weather"], 0.0);
        assert_eq!(keyword_relevance("", &[Memory::new("", MemoryTier::Working).with_id("e")])["e"], 0.0);
    }
}
