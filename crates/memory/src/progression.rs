//! Progression engine: runs [`ProgressionRule`]s against a session.
//!
//! Rules run in declaration order in a single pass; a later rule sees what
//! earlier ones moved. `memory_added` rules react to one new memory, `count`
//! rules look at the whole watched tier.

use memtier_config::AppConfig;
use memtier_core::error::Result;
use memtier_core::memory::{Memory, Metadata, keys};
use memtier_core::progression::{ProgressionAction, ProgressionRule, ProgressionTrigger};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::manager::{MemoryManager, MemoryUpdate, SessionScope};

/// What one progression pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressionReport {
    /// Names of the rules that fired.
    pub fired: Vec<String>,
    /// Ids moved to another tier.
    pub migrated: Vec<String>,
    /// Ids of the new copies made by promotion.
    pub promoted: Vec<String>,
}

impl ProgressionReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    fn merge(&mut self, other: ProgressionReport) {
        self.fired.extend(other.fired);
        self.migrated.extend(other.migrated);
        self.promoted.extend(other.promoted);
    }
}

/// An ordered set of progression rules.
#[derive(Debug, Clone, Default)]
pub struct ProgressionEngine {
    rules: Vec<ProgressionRule>,
}

impl ProgressionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut engine = Self::new();
        for rule in &config.progression {
            engine.register(rule.clone());
        }
        engine
    }

    /// Add a rule, replacing any rule of the same name in place.
    pub fn register(&mut self, rule: ProgressionRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.name == rule.name) {
            warn!(rule = %rule.name, "Replacing progression rule");
            *existing = rule;
        } else {
            debug!(rule = %rule.name, "Registered progression rule");
            self.rules.push(rule);
        }
    }

    pub fn with_rule(mut self, rule: ProgressionRule) -> Self {
        self.register(rule);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ProgressionRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn rules(&self) -> &[ProgressionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every `count` rule for `scope`.
    pub async fn apply(&self, manager: &MemoryManager, scope: &SessionScope) -> Result<ProgressionReport> {
        let mut report = ProgressionReport::default();
        for rule in &self.rules {
            if matches!(rule.trigger, ProgressionTrigger::Count { .. }) {
                report.merge(run_count_rule(rule, manager, scope).await?);
            }
        }
        Ok(report)
    }

    /// React to `memory` having been added: `memory_added` rules that match
    /// it act on it alone, then `count` rules watching its tier re-check.
    pub async fn on_added(
        &self,
        manager: &MemoryManager,
        scope: &SessionScope,
        memory: &Memory,
    ) -> Result<ProgressionReport> {
        let mut report = ProgressionReport::default();
        for rule in &self.rules {
            match &rule.trigger {
                ProgressionTrigger::MemoryAdded { .. } if rule.trigger.matches(memory) => {
                    report.fired.push(rule.name.clone());
                    info!(rule = %rule.name, memory_id = %memory.id, "Progression rule fired");
                    report.merge(act(rule, manager, scope, std::slice::from_ref(memory)).await?);
                }
                ProgressionTrigger::Count { tier, .. } if *tier == memory.tier => {
                    report.merge(run_count_rule(rule, manager, scope).await?);
                }
                _ => {}
            }
        }
        Ok(report)
    }
}

async fn run_count_rule(
    rule: &ProgressionRule,
    manager: &MemoryManager,
    scope: &SessionScope,
) -> Result<ProgressionReport> {
    let ProgressionTrigger::Count { threshold, .. } = rule.trigger else {
        return Ok(ProgressionReport::default());
    };
    let mut watched: Vec<Memory> = manager
        .list_memories(scope, Some(rule.trigger.tier()), usize::MAX, 0)
        .await?
        .into_iter()
        .filter(|m| rule.trigger.matches(m))
        .collect();
    if watched.len() < threshold {
        debug!(rule = %rule.name, count = watched.len(), threshold, "Progression threshold not reached");
        return Ok(ProgressionReport::default());
    }

    info!(rule = %rule.name, count = watched.len(), threshold, "Progression rule fired");
    // Oldest first; migration keeps the newest in place
    watched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    if let ProgressionAction::Migrate { keep_newest, .. } = rule.action {
        watched.truncate(watched.len().saturating_sub(keep_newest));
    }

    let mut report = ProgressionReport {
        fired: vec![rule.name.clone()],
        ..Default::default()
    };
    report.merge(act(rule, manager, scope, &watched).await?);
    Ok(report)
}

async fn act(
    rule: &ProgressionRule,
    manager: &MemoryManager,
    scope: &SessionScope,
    memories: &[Memory],
) -> Result<ProgressionReport> {
    let from = rule.trigger.tier();
    let to = rule.action.target_tier();
    let retag = |metadata: &mut Metadata| {
        if let Some(kind) = rule.action.target_type() {
            metadata.insert(keys::TYPE.into(), kind.into());
        }
    };

    let mut report = ProgressionReport::default();
    match rule.action {
        ProgressionAction::Migrate { .. } => {
            for memory in memories {
                if manager.migrate_tier(scope, &memory.id, from, to).await?.is_none() {
                    continue;
                }
                if rule.action.target_type().is_some() {
                    let mut update = MemoryUpdate::default();
                    retag(&mut update.metadata);
                    manager.update_memory(scope, &memory.id, Some(to), update).await?;
                }
                report.migrated.push(memory.id.clone());
            }
        }
        ProgressionAction::Promote { .. } => {
            for memory in memories {
                let mut filter = Metadata::new();
                filter.insert(keys::PROMOTED_FROM.into(), memory.id.clone().into());
                if !manager.search_by_metadata(scope, &filter, Some(to), 1).await?.is_empty() {
                    continue;
                }
                let mut metadata = memory.metadata.clone();
                metadata.insert(keys::PROMOTED_FROM.into(), memory.id.clone().into());
                retag(&mut metadata);
                let copy = manager
                    .insert_memory(scope, to, memory.content.clone(), metadata, Some(memory.importance))
                    .await?;
                report.promoted.push(copy.id);
            }
        }
    }
    debug!(
        rule = %rule.name,
        migrated = report.migrated.len(),
        promoted = report.promoted.len(),
        "Progression action done"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use memtier_budget::{TokenBudgetManager, TokenEstimator};
    use memtier_core::memory::{MemoryTier, kinds};
    use std::sync::Arc;

    fn archive_rule(threshold: usize, keep_newest: usize) -> ProgressionRule {
        ProgressionRule {
            name: "archive_turns".into(),
            trigger: ProgressionTrigger::Count {
                tier: MemoryTier::ShortTerm,
                memory_type: Some(kinds::CONVERSATION_TURN.into()),
                threshold,
            },
            action: ProgressionAction::Migrate {
                target_tier: MemoryTier::LongTerm,
                keep_newest,
                target_type: Some("archived_turn".into()),
            },
        }
    }

    fn manager_with(engine: ProgressionEngine) -> MemoryManager {
        MemoryManager::new(
            Arc::new(InMemoryStore::new()),
            TokenBudgetManager::new(TokenEstimator::default()),
        )
        .with_progression(engine)
    }

    fn scope() -> SessionScope {
        SessionScope::new("s1")
    }

    async fn add_turns(manager: &MemoryManager, n: usize) -> Vec<Memory> {
        let mut turns = Vec::new();
        for i in 0..n {
            turns.push(
                manager
                    .add_conversation_turn(&scope(), "user", format!("turn {i}"), None)
                    .await
                    .unwrap(),
            );
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        turns
    }

    #[test]
    fn register_replaces_same_name() {
        let mut engine = ProgressionEngine::new().with_rule(archive_rule(4, 2));
        engine.register(archive_rule(10, 0));
        assert_eq!(engine.rules().len(), 1);
        assert!(matches!(
            engine.get("archive_turns").unwrap().trigger,
            ProgressionTrigger::Count { threshold: 10, .. }
        ));
        assert!(engine.get("missing").is_none());
    }

    #[tokio::test]
    async fn count_rule_migrates_oldest_on_add() {
        let mgr = manager_with(ProgressionEngine::new().with_rule(archive_rule(4, 2)));
        let turns = add_turns(&mgr, 4).await;

        let short = mgr
            .list_memories(&scope(), Some(MemoryTier::ShortTerm), usize::MAX, 0)
            .await
            .unwrap();
        let mut kept: Vec<&str> = short.iter().map(|m| m.content.as_str()).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec!["turn 2", "turn 3"]);

        for old in &turns[..2] {
            let moved = mgr
                .get_memory(&scope(), &old.id, Some(MemoryTier::LongTerm))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(moved.kind(), Some("archived_turn"));
            assert_eq!(moved.ttl, None);
        }
    }

    #[tokio::test]
    async fn below_threshold_nothing_moves() {
        let mgr = manager_with(ProgressionEngine::new().with_rule(archive_rule(5, 0)));
        add_turns(&mgr, 3).await;

        let report = mgr.apply_progression(&scope()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(
            mgr.list_memories(&scope(), Some(MemoryTier::LongTerm), usize::MAX, 0)
                .await
                .unwrap()
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn explicit_apply_reports_migrations() {
        // Rules added after the fact run only when applied
        let seeded = manager_with(ProgressionEngine::new());
        add_turns(&seeded, 3).await;
        let mgr = MemoryManager::new(
            seeded.store().clone(),
            TokenBudgetManager::new(TokenEstimator::default()),
        )
        .with_progression(ProgressionEngine::new().with_rule(archive_rule(3, 1)));

        let report = mgr.apply_progression(&scope()).await.unwrap();
        assert_eq!(report.fired, vec!["archive_turns"]);
        assert_eq!(report.migrated.len(), 2);
        assert!(report.promoted.is_empty());

        // Already under the threshold now
        assert!(mgr.apply_progression(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_added_rule_promotes_once() {
        let rule = ProgressionRule {
            name: "remember_facts".into(),
            trigger: ProgressionTrigger::MemoryAdded {
                tier: MemoryTier::Working,
                memory_type: Some("fact".into()),
            },
            action: ProgressionAction::Promote {
                target_tier: MemoryTier::LongTerm,
                target_type: None,
            },
        };
        let engine = ProgressionEngine::new().with_rule(rule);
        let mgr = manager_with(engine.clone());

        let mut metadata = Metadata::new();
        metadata.insert(keys::TYPE.into(), "fact".into());
        let fact = mgr
            .add_memory(&scope(), MemoryTier::Working, "sky is blue", metadata, Some(0.7))
            .await
            .unwrap();
        mgr.add_memory(&scope(), MemoryTier::Working, "unrelated", Metadata::new(), None)
            .await
            .unwrap();

        let long = mgr
            .list_memories(&scope(), Some(MemoryTier::LongTerm), usize::MAX, 0)
            .await
            .unwrap();
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].content, "sky is blue");
        assert_eq!(long[0].metadata_text(keys::PROMOTED_FROM).as_deref(), Some(fact.id.as_str()));
        assert!((long[0].importance - 0.7).abs() < f32::EPSILON);

        // The source stays in working memory, and a second pass copies nothing
        assert!(mgr.get_memory(&scope(), &fact.id, Some(MemoryTier::Working)).await.unwrap().is_some());
        let report = engine.on_added(&mgr, &scope(), &fact).await.unwrap();
        assert_eq!(report.fired, vec!["remember_facts"]);
        assert!(report.promoted.is_empty());
    }

    #[tokio::test]
    async fn from_config_loads_rules() {
        let mut config = AppConfig::default();
        config.progression.push(archive_rule(2, 0));
        let engine = ProgressionEngine::from_config(&config);
        assert_eq!(engine.rules().len(), 1);
        assert!(!engine.is_empty());
    }
}
