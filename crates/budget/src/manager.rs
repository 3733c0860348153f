//! Token budget manager: the one-call prompt construction pipeline.
//!
//! Per call: `ESTIMATE → SELECT_PER_TIER → CHECK_TOTAL → [ADAPT]* → FORMAT
//! → ASSEMBLE`. The manager holds only immutable configuration, so a single
//! instance can serve concurrent callers.
//!
//! # Determinism
//!
//! With an explicit `now` on the request, identical inputs always produce
//! identical prompts. Without one the current time is used for recency.

use chrono::{DateTime, Utc};
use memtier_config::AppConfig;
use memtier_core::error::BudgetError;
use memtier_core::memory::{Memory, MemoryTier};
use memtier_core::strategy::{AdaptationKind, SelectorKind};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::adaptation::{AdaptContext, Adaptation, Selection, strategy_for};
use crate::estimator::TokenEstimator;
use crate::format::MemoryFormatter;
use crate::prompt::{PromptConstructor, PromptSection, TokenUsageBreakdown};
use crate::rules::{
    BudgetDefaults, BudgetRules, ComponentRule, tier_map, validate_allocation,
    validate_section_order,
};
use crate::selection::{MemorySelector, PriorityWeights, validate_threshold};
use crate::summarizer::{ExtractiveSummarizer, Summarizer};

// ── Types ─────────────────────────────────────────────────────────────────

/// Per-request overrides. Anything left unset falls back to the
/// component's rule, then to the manager defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency_weight: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance_weight: Option<f32>,

    /// Relevance per memory id, used by the relevance selector.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub relevance_scores: HashMap<String, f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_threshold: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation_chain: Option<Vec<AdaptationKind>>,

    /// Order of memory sections in the prompt. Tiers left out are appended
    /// in default order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_order: Option<Vec<MemoryTier>>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub format_templates: BTreeMap<MemoryTier, String>,

    /// Fixed token caps per tier, used verbatim.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tier_budgets: BTreeMap<MemoryTier, usize>,

    /// Fractions of the memory budget per tier.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tier_allocation: BTreeMap<MemoryTier, f32>,
}

/// Everything needed to build one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub system_message: String,
    pub user_query: String,

    /// Candidate memories, already split by tier.
    #[serde(default)]
    pub candidates: BTreeMap<MemoryTier, Vec<Memory>>,

    /// Total prompt budget in tokens. Negative values are rejected.
    pub total_budget: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,

    /// Reference time for recency scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<DateTime<Utc>>,

    #[serde(default)]
    pub options: PromptOptions,
}

impl PromptRequest {
    pub fn new(
        system_message: impl Into<String>,
        user_query: impl Into<String>,
        total_budget: i64,
    ) -> Self {
        Self {
            system_message: system_message.into(),
            user_query: user_query.into(),
            candidates: BTreeMap::new(),
            total_budget,
            component_id: None,
            now: None,
            options: PromptOptions::default(),
        }
    }

    pub fn with_candidates(mut self, tier: MemoryTier, memories: Vec<Memory>) -> Self {
        self.candidates.entry(tier).or_default().extend(memories);
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_options(mut self, options: PromptOptions) -> Self {
        self.options = options;
        self
    }
}

/// The finished prompt and its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    pub prompt: String,
    pub token_usage: TokenUsageBreakdown,
    /// Mirrors `token_usage.budget_exceeded`.
    pub budget_exceeded: bool,
    /// Ids dropped by adaptation strategies.
    pub removed_ids: Vec<String>,
    /// Ids whose content was replaced by a summary.
    pub summarized_ids: Vec<String>,
}

/// Options after request → component rule → default resolution.
struct ResolvedOptions {
    selector: SelectorKind,
    weights: PriorityWeights,
    threshold: f32,
    chain: Vec<AdaptationKind>,
    section_order: Vec<MemoryTier>,
    allocation: BTreeMap<MemoryTier, f32>,
}

// ── Manager ───────────────────────────────────────────────────────────────

/// Builds budgeted prompts. Stateless between calls; create one and reuse
/// it.
pub struct TokenBudgetManager {
    estimator: TokenEstimator,
    defaults: BudgetDefaults,
    rules: BudgetRules,
    formatter: MemoryFormatter,
    constructor: PromptConstructor,
    summarizer: Option<Arc<dyn Summarizer>>,
    reserved_tokens: usize,
}

impl TokenBudgetManager {
    /// A manager with default options, no component rules and no
    /// summarizer.
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            defaults: BudgetDefaults::default(),
            rules: BudgetRules::new(),
            formatter: MemoryFormatter::new(),
            constructor: PromptConstructor::new(estimator),
            summarizer: None,
            reserved_tokens: 0,
        }
    }

    /// Build a manager from application configuration, with the extractive
    /// summarizer installed.
    pub fn from_config(config: &AppConfig) -> Result<Self, BudgetError> {
        let estimator = TokenEstimator::from_config(&config.estimator)?;

        let mut formatter =
            MemoryFormatter::new().with_title_template(config.budget.title_template.clone());
        for (tier, template) in tier_map(&config.budget.templates)? {
            formatter = formatter.with_template(tier, template);
        }

        Ok(Self::new(estimator)
            .with_defaults(BudgetDefaults::from_config(&config.budget)?)
            .with_rules(BudgetRules::from_config(config)?)
            .with_formatter(formatter)
            .with_query_prefix(config.budget.query_prefix.clone())
            .with_reserved_tokens(config.application.reserved_tokens)
            .with_summarizer(Arc::new(ExtractiveSummarizer::new(estimator))))
    }

    pub fn with_defaults(mut self, defaults: BudgetDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_rules(mut self, rules: BudgetRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_rule(mut self, component_id: impl Into<String>, rule: ComponentRule) -> Self {
        self.rules.insert(component_id, rule);
        self
    }

    pub fn with_formatter(mut self, formatter: MemoryFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.constructor = self.constructor.with_query_prefix(prefix);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Tokens held back from every budget (e.g. for the model's answer).
    pub fn with_reserved_tokens(mut self, reserved: usize) -> Self {
        self.reserved_tokens = reserved;
        self
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn defaults(&self) -> &BudgetDefaults {
        &self.defaults
    }

    /// Build a prompt within `request.total_budget`.
    ///
    /// Fails only on invalid configuration. Running out of budget is not an
    /// error: the best-effort prompt is returned with `budget_exceeded` set.
    pub fn construct_prompt(&self, request: &PromptRequest) -> Result<PromptResult, BudgetError> {
        if request.total_budget < 0 {
            return Err(BudgetError::NegativeBudget(request.total_budget));
        }
        let rule = request
            .component_id
            .as_deref()
            .and_then(|id| self.rules.get(id));
        let resolved = self.resolve(&request.options, rule)?;

        for memory in request.candidates.values().flatten() {
            if !memory.has_valid_importance() {
                return Err(BudgetError::InvalidImportance {
                    id: memory.id.clone(),
                    value: memory.importance,
                });
            }
        }

        let mut budget = usize::try_from(request.total_budget).unwrap_or(usize::MAX);
        if let Some(limit) = rule.and_then(|r| r.token_limit) {
            budget = budget.min(limit);
        }
        let now = request.now.unwrap_or_else(Utc::now);
        let formatter = self.formatter_for(&request.options);
        let estimator = &self.estimator;

        // ── Estimate: fixed cost and memory budget ────────────────────────
        let system_tokens = estimator.estimate(&request.system_message);
        let query_tokens = estimator.estimate(&self.constructor.render_query(&request.user_query));
        let fixed = system_tokens + query_tokens + self.reserved_tokens;

        let title_tokens: BTreeMap<MemoryTier, usize> = resolved
            .section_order
            .iter()
            .filter(|tier| request.candidates.get(tier).is_some_and(|m| !m.is_empty()))
            .map(|tier| (*tier, estimator.estimate(&formatter.title(*tier))))
            .collect();
        let memory_budget = budget
            .saturating_sub(fixed)
            .saturating_sub(title_tokens.values().sum());

        tracing::debug!(
            budget,
            fixed,
            titles = title_tokens.values().sum::<usize>(),
            memory_budget,
            "Computed memory budget"
        );

        // ── Select per tier ───────────────────────────────────────────────
        let selector = match resolved.selector {
            SelectorKind::Priority => MemorySelector::priority(resolved.weights),
            SelectorKind::Relevance => MemorySelector::relevance(
                request.options.relevance_scores.clone(),
                resolved.threshold,
            )?,
        };

        let mut ctx = AdaptContext::new(estimator, now)
            .with_weights(resolved.weights)
            .with_formatter(&formatter)
            .with_summarize_limits(self.defaults.summarize_min_chars, self.defaults.summary_ratio);
        if let Some(summarizer) = &self.summarizer {
            ctx = ctx.with_summarizer(summarizer.as_ref());
        }

        let mut selection = Selection::new();
        let mut eligible = 0usize;
        for tier in &resolved.section_order {
            let Some(candidates) = request.candidates.get(tier) else {
                continue;
            };
            eligible += candidates.iter().filter(|m| selector.is_eligible(m)).count();
            let tier_budget = self.tier_budget(*tier, memory_budget, &request.options, &resolved);
            let chosen = selector.select_by(candidates, tier_budget, |m| ctx.cost(*tier, m), now);
            tracing::debug!(
                tier = tier.as_str(),
                candidates = candidates.len(),
                selected = chosen.len(),
                tier_budget,
                "Selected memories"
            );
            selection.insert(*tier, chosen);
        }
        let mut used: usize = selection
            .iter()
            .map(|(tier, memories)| ctx.tier_cost(*tier, memories))
            .sum();

        // ── Check total / adapt ───────────────────────────────────────────
        let mut removed_ids = Vec::new();
        let mut summarized_ids = Vec::new();
        if used > memory_budget {
            let outcome = adapt_chain(&resolved.chain, selection, used, memory_budget, &ctx);
            selection = outcome.selection;
            used = outcome.used_tokens;
            removed_ids.extend(outcome.removed_ids);
            summarized_ids.extend(outcome.summarized_ids);
        }

        // ── Format; re-adapt against the rendered cost ────────────────────
        let mut sections = render_sections(&formatter, &resolved.section_order, &selection, estimator);
        loop {
            let rendered = fixed + sections.iter().map(|s| s.tokens).sum::<usize>();
            if rendered <= budget {
                break;
            }
            let target = used.saturating_sub(rendered - budget);
            tracing::debug!(rendered, budget, used, target, "Rendered sections exceed budget");
            let outcome = adapt_chain(&resolved.chain, selection, used, target, &ctx);
            let changed = !outcome.removed_ids.is_empty() || !outcome.summarized_ids.is_empty();
            selection = outcome.selection;
            used = outcome.used_tokens;
            removed_ids.extend(outcome.removed_ids);
            summarized_ids.extend(outcome.summarized_ids);
            if !changed {
                break;
            }
            sections = render_sections(&formatter, &resolved.section_order, &selection, estimator);
        }

        let (prompt, mut usage) = self.constructor.assemble(
            &request.system_message,
            &sections,
            &request.user_query,
            budget,
        );
        if self.reserved_tokens > 0 {
            usage.add_part("reserved", self.reserved_tokens);
        }

        let included: usize = selection.values().map(Vec::len).sum();
        usage.budget_exceeded = usage.over_budget() || (eligible > 0 && included == 0);
        if usage.budget_exceeded {
            tracing::warn!(
                total = usage.total,
                budget,
                eligible,
                included,
                "Prompt budget exceeded"
            );
        }

        Ok(PromptResult {
            prompt,
            budget_exceeded: usage.budget_exceeded,
            token_usage: usage,
            removed_ids,
            summarized_ids,
        })
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn resolve(
        &self,
        options: &PromptOptions,
        rule: Option<&ComponentRule>,
    ) -> Result<ResolvedOptions, BudgetError> {
        let defaults = &self.defaults;

        let weights = PriorityWeights {
            recency: options
                .recency_weight
                .or(rule.and_then(|r| r.recency_weight))
                .unwrap_or(defaults.weights.recency),
            importance: options
                .importance_weight
                .or(rule.and_then(|r| r.importance_weight))
                .unwrap_or(defaults.weights.importance),
        };
        weights.validate()?;

        let threshold = options
            .relevance_threshold
            .or(rule.and_then(|r| r.relevance_threshold))
            .unwrap_or(defaults.relevance_threshold);
        validate_threshold(threshold)?;

        let allocation = if !options.tier_allocation.is_empty() {
            options.tier_allocation.clone()
        } else if let Some(r) = rule.filter(|r| !r.memory_allocation.is_empty()) {
            r.memory_allocation.clone()
        } else {
            defaults.tier_allocation.clone()
        };
        validate_allocation(&allocation)?;

        let mut section_order = options
            .section_order
            .clone()
            .unwrap_or_else(|| defaults.section_order.clone());
        validate_section_order(&section_order)?;
        for tier in MemoryTier::ALL {
            if !section_order.contains(&tier) {
                section_order.push(tier);
            }
        }

        Ok(ResolvedOptions {
            selector: options
                .selector
                .or(rule.and_then(|r| r.selector))
                .unwrap_or(defaults.selector),
            weights,
            threshold,
            chain: options
                .adaptation_chain
                .clone()
                .or_else(|| rule.and_then(|r| r.adaptation_chain.clone()))
                .unwrap_or_else(|| defaults.adaptation_chain.clone()),
            section_order,
            allocation,
        })
    }

    /// Sub-budget of a tier: explicit cap, else allocated fraction, else the
    /// whole memory budget.
    fn tier_budget(
        &self,
        tier: MemoryTier,
        memory_budget: usize,
        options: &PromptOptions,
        resolved: &ResolvedOptions,
    ) -> usize {
        if let Some(cap) = options.tier_budgets.get(&tier) {
            return *cap;
        }
        if let Some(fraction) = resolved.allocation.get(&tier) {
            return (memory_budget as f64 * f64::from(*fraction)).floor() as usize;
        }
        memory_budget
    }

    fn formatter_for(&self, options: &PromptOptions) -> Cow<'_, MemoryFormatter> {
        if options.format_templates.is_empty() {
            return Cow::Borrowed(&self.formatter);
        }
        let mut formatter = self.formatter.clone();
        for (tier, template) in &options.format_templates {
            formatter = formatter.with_template(*tier, template.clone());
        }
        Cow::Owned(formatter)
    }
}

/// Run `chain` in order until `used` meets `target` or the chain ends.
fn adapt_chain(
    chain: &[AdaptationKind],
    selection: Selection,
    used: usize,
    target: usize,
    ctx: &AdaptContext<'_>,
) -> Adaptation {
    let mut adaptation = Adaptation {
        selection,
        used_tokens: used,
        removed_ids: Vec::new(),
        summarized_ids: Vec::new(),
    };
    for kind in chain {
        if adaptation.used_tokens <= target {
            break;
        }
        let before = adaptation.used_tokens;
        let outcome = strategy_for(*kind).adapt(adaptation.selection, before, target, ctx);
        tracing::info!(
            strategy = kind.as_str(),
            before,
            after = outcome.used_tokens,
            target,
            removed = outcome.removed_ids.len(),
            summarized = outcome.summarized_ids.len(),
            "Adapted selection"
        );
        adaptation.selection = outcome.selection;
        adaptation.used_tokens = outcome.used_tokens;
        adaptation.removed_ids.extend(outcome.removed_ids);
        adaptation.summarized_ids.extend(outcome.summarized_ids);
    }
    adaptation
}

/// Non-empty tier sections in `order`, each costed by its rendered text.
fn render_sections(
    formatter: &MemoryFormatter,
    order: &[MemoryTier],
    selection: &Selection,
    estimator: &TokenEstimator,
) -> Vec<PromptSection> {
    order
        .iter()
        .filter_map(|tier| {
            let memories = selection.get(tier).filter(|m| !m.is_empty())?;
            let text = formatter.format_section(*tier, memories);
            Some(PromptSection::from_text(*tier, text, estimator))
        })
        .collect()
}
