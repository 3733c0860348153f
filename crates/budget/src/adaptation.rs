//! Adaptation strategies: shrink a selection that still exceeds its target.
//!
//! This happens when several tiers each fit their own sub-budget but their
//! sum overflows the shared memory budget. Strategies never fail for
//! "cannot reduce further"; they return the best they could do and the
//! caller decides whether the budget was exceeded.

use chrono::{DateTime, Utc};
use memtier_core::memory::{Memory, MemoryTier};
use memtier_core::strategy::AdaptationKind;
use std::collections::BTreeMap;

use crate::estimator::TokenEstimator;
use crate::format::MemoryFormatter;
use crate::selection::PriorityWeights;
use crate::summarizer::Summarizer;

/// Selected memories per tier.
pub type Selection = BTreeMap<MemoryTier, Vec<Memory>>;

/// Everything a strategy may consult besides the selection itself.
#[derive(Clone, Copy)]
pub struct AdaptContext<'a> {
    pub estimator: &'a TokenEstimator,
    /// Scoring used to find the lowest-priority memory.
    pub weights: PriorityWeights,
    pub now: DateTime<Utc>,
    pub summarizer: Option<&'a dyn Summarizer>,
    /// When set, a memory costs at least its rendered item text.
    pub formatter: Option<&'a MemoryFormatter>,
    /// Contents at most this many characters long are never summarized.
    pub summarize_min_chars: usize,
    /// Summary target relative to the original content's tokens.
    pub summary_ratio: f32,
}

impl<'a> AdaptContext<'a> {
    pub fn new(estimator: &'a TokenEstimator, now: DateTime<Utc>) -> Self {
        Self {
            estimator,
            weights: PriorityWeights::default(),
            now,
            summarizer: None,
            formatter: None,
            summarize_min_chars: 200,
            summary_ratio: 0.5,
        }
    }

    pub fn with_weights(mut self, weights: PriorityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_summarizer(mut self, summarizer: &'a dyn Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_summarize_limits(mut self, min_chars: usize, ratio: f32) -> Self {
        self.summarize_min_chars = min_chars;
        self.summary_ratio = ratio;
        self
    }

    pub fn with_formatter(mut self, formatter: &'a MemoryFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Tokens one memory takes in `tier`'s section: the estimator's cost,
    /// or the rendered item when the template makes it larger.
    pub fn cost(&self, tier: MemoryTier, memory: &Memory) -> usize {
        let modelled = self.estimator.estimate_memory(memory);
        match self.formatter {
            Some(formatter) => {
                let rendered = formatter.format_one(memory, 1, &formatter.template_for(tier));
                modelled.max(self.estimator.estimate(&rendered))
            }
            None => modelled,
        }
    }

    pub fn tier_cost(&self, tier: MemoryTier, memories: &[Memory]) -> usize {
        memories.iter().map(|m| self.cost(tier, m)).sum()
    }
}

/// Result of one adaptation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub selection: Selection,
    pub used_tokens: usize,
    /// Ids removed from the selection, in removal order.
    pub removed_ids: Vec<String>,
    /// Ids whose content was replaced by a summary.
    pub summarized_ids: Vec<String>,
}

impl Adaptation {
    fn unchanged(selection: Selection, used_tokens: usize) -> Self {
        Self {
            selection,
            used_tokens,
            removed_ids: Vec::new(),
            summarized_ids: Vec::new(),
        }
    }
}

/// A way of bringing `used_tokens` down to `target_tokens`.
///
/// Implementations never increase `used_tokens` and never report ids that
/// were not in the input selection.
pub trait AdaptationStrategy: Send + Sync {
    fn kind(&self) -> AdaptationKind;

    fn adapt(
        &self,
        selection: Selection,
        used_tokens: usize,
        target_tokens: usize,
        ctx: &AdaptContext<'_>,
    ) -> Adaptation;
}

/// The strategy implementing `kind`.
pub fn strategy_for(kind: AdaptationKind) -> &'static dyn AdaptationStrategy {
    match kind {
        AdaptationKind::Reduce => &Reduce,
        AdaptationKind::Summarize => &Summarize,
        AdaptationKind::PrioritizeTier => &PrioritizeTier,
    }
}

// ── Reduce ────────────────────────────────────────────────────────────────

/// Drop the lowest-priority memory, across all tiers, until the target is
/// met or nothing remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reduce;

impl AdaptationStrategy for Reduce {
    fn kind(&self) -> AdaptationKind {
        AdaptationKind::Reduce
    }

    fn adapt(
        &self,
        selection: Selection,
        used_tokens: usize,
        target_tokens: usize,
        ctx: &AdaptContext<'_>,
    ) -> Adaptation {
        let mut adaptation = Adaptation::unchanged(selection, used_tokens);
        reduce_within(&mut adaptation, target_tokens, ctx, None);
        adaptation
    }
}

/// Remove lowest-priority memories (optionally from one tier only) until
/// `used_tokens <= target`.
fn reduce_within(
    adaptation: &mut Adaptation,
    target: usize,
    ctx: &AdaptContext<'_>,
    only: Option<MemoryTier>,
) {
    while adaptation.used_tokens > target {
        // Worst = greatest under the priority ordering; on a full tie the
        // later position goes first.
        let victim = adaptation
            .selection
            .iter()
            .filter(|(tier, _)| only.is_none_or(|o| o == **tier))
            .flat_map(|(tier, memories)| {
                memories
                    .iter()
                    .enumerate()
                    .map(move |(index, memory)| (*tier, index, memory))
            })
            .max_by(|a, b| {
                ctx.weights
                    .compare(a.2, b.2, ctx.now)
                    .then((a.0, a.1).cmp(&(b.0, b.1)))
            })
            .map(|(tier, index, _)| (tier, index));

        let Some((tier, index)) = victim else {
            break;
        };
        let Some(memories) = adaptation.selection.get_mut(&tier) else {
            break;
        };
        let memory = memories.remove(index);
        let cost = ctx.cost(tier, &memory);
        adaptation.used_tokens = adaptation.used_tokens.saturating_sub(cost);
        tracing::debug!(
            memory_id = %memory.id,
            tier = tier.as_str(),
            cost,
            used = adaptation.used_tokens,
            target,
            "Reduced selection"
        );
        adaptation.removed_ids.push(memory.id);
    }
}

// ── Summarize ─────────────────────────────────────────────────────────────

/// Replace long contents with summaries, long-term memories first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Summarize;

impl AdaptationStrategy for Summarize {
    fn kind(&self) -> AdaptationKind {
        AdaptationKind::Summarize
    }

    fn adapt(
        &self,
        selection: Selection,
        used_tokens: usize,
        target_tokens: usize,
        ctx: &AdaptContext<'_>,
    ) -> Adaptation {
        let mut adaptation = Adaptation::unchanged(selection, used_tokens);
        if adaptation.used_tokens <= target_tokens {
            return adaptation;
        }
        let Some(summarizer) = ctx.summarizer else {
            tracing::debug!("No summarizer configured, skipping summarize strategy");
            return adaptation;
        };

        'tiers: for tier in MemoryTier::DROP_ORDER {
            let Some(memories) = adaptation.selection.get_mut(&tier) else {
                continue;
            };
            for memory in memories.iter_mut() {
                if adaptation.used_tokens <= target_tokens {
                    break 'tiers;
                }
                if memory.content.chars().count() <= ctx.summarize_min_chars {
                    continue;
                }

                let before = ctx.cost(tier, memory);
                let content_tokens = ctx.estimator.estimate(&memory.content);
                let max_tokens =
                    ((content_tokens as f64 * f64::from(ctx.summary_ratio)).ceil() as usize).max(1);

                let summary = match summarizer.summarize(&memory.content, max_tokens) {
                    Ok(summary) => summary,
                    Err(e) => {
                        tracing::warn!(memory_id = %memory.id, error = %e, "Summarizer failed, keeping original content");
                        continue;
                    }
                };

                let mut candidate = memory.clone();
                candidate.content = summary;
                let after = ctx.cost(tier, &candidate);
                if after >= before {
                    tracing::debug!(memory_id = %memory.id, before, after, "Summary is not cheaper, keeping original");
                    continue;
                }

                *memory = candidate;
                adaptation.used_tokens = adaptation.used_tokens.saturating_sub(before - after);
                tracing::debug!(
                    memory_id = %memory.id,
                    tier = tier.as_str(),
                    before,
                    after,
                    "Summarized memory"
                );
                adaptation.summarized_ids.push(memory.id.clone());
            }
        }

        adaptation
    }
}

// ── PrioritizeTier ────────────────────────────────────────────────────────

/// Drop whole tiers in order LONG_TERM, WORKING, SHORT_TERM. When dropping a
/// tier would undershoot the target, reduce inside that tier instead and
/// stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritizeTier;

impl AdaptationStrategy for PrioritizeTier {
    fn kind(&self) -> AdaptationKind {
        AdaptationKind::PrioritizeTier
    }

    fn adapt(
        &self,
        selection: Selection,
        used_tokens: usize,
        target_tokens: usize,
        ctx: &AdaptContext<'_>,
    ) -> Adaptation {
        let mut adaptation = Adaptation::unchanged(selection, used_tokens);

        for tier in MemoryTier::DROP_ORDER {
            if adaptation.used_tokens <= target_tokens {
                break;
            }
            let tier_cost = match adaptation.selection.get(&tier) {
                Some(memories) if !memories.is_empty() => ctx.tier_cost(tier, memories),
                _ => continue,
            };

            let without = adaptation.used_tokens.saturating_sub(tier_cost);
            if without >= target_tokens {
                let dropped = adaptation
                    .selection
                    .get_mut(&tier)
                    .map(std::mem::take)
                    .unwrap_or_default();
                tracing::debug!(
                    tier = tier.as_str(),
                    count = dropped.len(),
                    tokens = tier_cost,
                    "Dropped tier"
                );
                adaptation.used_tokens = without;
                adaptation
                    .removed_ids
                    .extend(dropped.into_iter().map(|m| m.id));
            } else {
                reduce_within(&mut adaptation, target_tokens, ctx, Some(tier));
                break;
            }
        }

        adaptation
    }
}
