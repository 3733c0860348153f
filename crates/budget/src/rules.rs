//! Budget defaults and per-component rules.
//!
//! Options resolve in order: explicit request option, then the rule of the
//! requesting component, then the manager-wide default.

use memtier_config::{AppConfig, BudgetConfig, ComponentConfig, parse_tier_map};
use memtier_core::error::BudgetError;
use memtier_core::memory::MemoryTier;
use memtier_core::strategy::{AdaptationKind, SelectorKind};
use std::collections::{BTreeMap, HashMap};

use crate::selection::{PriorityWeights, validate_threshold};

/// Manager-wide defaults for every option a request may leave out.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetDefaults {
    pub selector: SelectorKind,
    pub weights: PriorityWeights,
    pub relevance_threshold: f32,
    pub adaptation_chain: Vec<AdaptationKind>,
    pub section_order: Vec<MemoryTier>,
    pub tier_allocation: BTreeMap<MemoryTier, f32>,
    pub summarize_min_chars: usize,
    pub summary_ratio: f32,
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            selector: SelectorKind::Priority,
            weights: PriorityWeights::default(),
            relevance_threshold: 0.1,
            adaptation_chain: vec![AdaptationKind::Reduce],
            section_order: MemoryTier::ALL.to_vec(),
            tier_allocation: BTreeMap::new(),
            summarize_min_chars: 200,
            summary_ratio: 0.5,
        }
    }
}

impl BudgetDefaults {
    pub fn from_config(config: &BudgetConfig) -> Result<Self, BudgetError> {
        let defaults = Self {
            selector: config.selector,
            weights: PriorityWeights::new(config.recency_weight, config.importance_weight)?,
            relevance_threshold: config.relevance_threshold,
            adaptation_chain: config.adaptation_chain.clone(),
            section_order: config.section_order.clone(),
            tier_allocation: tier_map(&config.tier_allocation)?,
            summarize_min_chars: config.summarize_min_chars,
            summary_ratio: config.summary_ratio,
        };
        defaults.validate()?;
        Ok(defaults)
    }

    pub fn validate(&self) -> Result<(), BudgetError> {
        self.weights.validate()?;
        validate_threshold(self.relevance_threshold)?;
        validate_allocation(&self.tier_allocation)?;
        validate_section_order(&self.section_order)?;
        if !(self.summary_ratio > 0.0 && self.summary_ratio <= 1.0) {
            return Err(BudgetError::InvalidRatio(self.summary_ratio));
        }
        Ok(())
    }
}

/// Defaults for one component. Unset fields fall through to
/// [`BudgetDefaults`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentRule {
    /// Upper bound on the prompt budget.
    pub token_limit: Option<usize>,
    pub memory_allocation: BTreeMap<MemoryTier, f32>,
    pub selector: Option<SelectorKind>,
    pub recency_weight: Option<f32>,
    pub importance_weight: Option<f32>,
    pub relevance_threshold: Option<f32>,
    pub adaptation_chain: Option<Vec<AdaptationKind>>,
}

impl ComponentRule {
    pub fn from_config(config: &ComponentConfig) -> Result<Self, BudgetError> {
        let rule = Self {
            token_limit: config.token_limit,
            memory_allocation: tier_map(&config.memory_allocation)?,
            selector: config.selector,
            recency_weight: config.recency_weight,
            importance_weight: config.importance_weight,
            relevance_threshold: config.relevance_threshold,
            adaptation_chain: config.adaptation_chain.clone(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), BudgetError> {
        PriorityWeights {
            recency: self.recency_weight.unwrap_or(0.0),
            importance: self.importance_weight.unwrap_or(0.0),
        }
        .validate()?;
        if let Some(threshold) = self.relevance_threshold {
            validate_threshold(threshold)?;
        }
        validate_allocation(&self.memory_allocation)
    }
}

/// Component rules keyed by component id.
#[derive(Debug, Clone, Default)]
pub struct BudgetRules {
    components: HashMap<String, ComponentRule>,
}

impl BudgetRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, BudgetError> {
        let mut rules = Self::new();
        for component in &config.components {
            rules.insert(component.id.clone(), ComponentRule::from_config(component)?);
        }
        Ok(rules)
    }

    pub fn insert(&mut self, component_id: impl Into<String>, rule: ComponentRule) {
        self.components.insert(component_id.into(), rule);
    }

    pub fn get(&self, component_id: &str) -> Option<&ComponentRule> {
        self.components.get(component_id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

pub(crate) fn tier_map<T: Clone>(map: &BTreeMap<String, T>) -> Result<BTreeMap<MemoryTier, T>, BudgetError> {
    parse_tier_map(map).map_err(|_| {
        let unknown = map
            .keys()
            .find(|name| name.parse::<MemoryTier>().is_err())
            .cloned()
            .unwrap_or_default();
        BudgetError::UnknownTier(unknown)
    })
}

pub(crate) fn validate_allocation(allocation: &BTreeMap<MemoryTier, f32>) -> Result<(), BudgetError> {
    for (tier, value) in allocation {
        if !(0.0..=1.0).contains(value) {
            return Err(BudgetError::InvalidAllocation {
                tier: *tier,
                value: *value,
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_section_order(order: &[MemoryTier]) -> Result<(), BudgetError> {
    for (i, tier) in order.iter().enumerate() {
        if order[..i].contains(tier) {
            return Err(BudgetError::DuplicateSection(*tier));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_default_config() {
        let defaults = BudgetDefaults::from_config(&BudgetConfig::default()).unwrap();
        assert_eq!(defaults, BudgetDefaults::default());
    }

    #[test]
    fn rejects_bad_defaults() {
        let mut config = BudgetConfig::default();
        config.summary_ratio = 0.0;
        assert!(matches!(
            BudgetDefaults::from_config(&config),
            Err(BudgetError::InvalidRatio(_))
        ));

        let mut config = BudgetConfig::default();
        config.section_order = vec![MemoryTier::LongTerm, MemoryTier::LongTerm];
        assert_eq!(
            BudgetDefaults::from_config(&config),
            Err(BudgetError::DuplicateSection(MemoryTier::LongTerm))
        );

        let mut config = BudgetConfig::default();
        config.tier_allocation.insert("episodic".into(), 0.5);
        assert_eq!(
            BudgetDefaults::from_config(&config),
            Err(BudgetError::UnknownTier("episodic".into()))
        );
    }

    #[test]
    fn rules_from_components() {
        let mut config = AppConfig::default();
        config.components.push(ComponentConfig {
            id: "planner".into(),
            token_limit: Some(1500),
            memory_allocation: BTreeMap::from([("working".to_string(), 0.6)]),
            importance_weight: Some(0.9),
            ..Default::default()
        });
        let rules = BudgetRules::from_config(&config).unwrap();
        assert_eq!(rules.len(), 1);
        let planner = rules.get("planner").unwrap();
        assert_eq!(planner.token_limit, Some(1500));
        assert_eq!(planner.memory_allocation[&MemoryTier::Working], 0.6);
        assert!(rules.get("executor").is_none());
    }

    #[test]
    fn invalid_rule_rejected() {
        let rule = ComponentRule {
            memory_allocation: BTreeMap::from([(MemoryTier::ShortTerm, 1.5)]),
            ..Default::default()
        };
        assert!(matches!(
            rule.validate(),
            Err(BudgetError::InvalidAllocation { tier: MemoryTier::ShortTerm, .. })
        ));
        let rule = ComponentRule {
            recency_weight: Some(-1.0),
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }
}
