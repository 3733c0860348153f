//! Memory manager — session-scoped memory operations over a store, plus
//! prompt generation through the budget engine.
//!
//! Every call takes an explicit [`SessionScope`]; the manager holds no
//! per-session state. Keys follow [`Namespace`], so one store can serve
//! many sessions and components at once.

use chrono::Utc;
use memtier_budget::{PromptOptions, PromptRequest, PromptResult, TokenBudgetManager, keyword_relevance};
use memtier_config::{AppConfig, StorageBackend, TiersConfig};
use memtier_core::error::{BudgetError, Result};
use memtier_core::memory::{Memory, MemoryTier, Metadata, keys, kinds};
use memtier_core::namespace::{DEFAULT_COMPONENT, DEFAULT_FRAMEWORK, DEFAULT_SESSION, Namespace};
use memtier_core::store::{MemoryStore, ScanOrder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::file_backend::FileStore;
use crate::in_memory::InMemoryStore;
use crate::progression::{ProgressionEngine, ProgressionReport};

/// Which session and component a call acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionScope {
    pub session_id: String,
    pub component_id: String,
}

impl SessionScope {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            component_id: DEFAULT_COMPONENT.into(),
        }
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }
}

impl Default for SessionScope {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION)
    }
}

/// Changes applied by [`MemoryManager::update_memory`]. Metadata is merged
/// into the existing map, not replaced.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub metadata: Metadata,
    pub importance: Option<f32>,
}

/// Input of [`MemoryManager::generate_prompt`].
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_message: String,
    pub user_query: String,
    /// Falls back to the configured global token limit.
    pub total_budget: Option<usize>,
    /// Most recent conversation turns to consider.
    pub max_turns: usize,
    pub include_working: bool,
    pub include_long_term: bool,
    pub options: PromptOptions,
}

impl GenerateRequest {
    pub fn new(system_message: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            system_message: system_message.into(),
            user_query: user_query.into(),
            total_budget: None,
            max_turns: 10,
            include_working: true,
            include_long_term: true,
            options: PromptOptions::default(),
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.total_budget = Some(budget);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_tiers(mut self, working: bool, long_term: bool) -> Self {
        self.include_working = working;
        self.include_long_term = long_term;
        self
    }

    pub fn with_options(mut self, options: PromptOptions) -> Self {
        self.options = options;
        self
    }
}

/// Session-scoped memory operations over a [`MemoryStore`].
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    budget: TokenBudgetManager,
    tiers: TiersConfig,
    framework: String,
    component_frameworks: HashMap<String, String>,
    default_budget: usize,
    progression: ProgressionEngine,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, budget: TokenBudgetManager) -> Self {
        Self {
            store,
            budget,
            tiers: TiersConfig::default(),
            framework: DEFAULT_FRAMEWORK.into(),
            component_frameworks: HashMap::new(),
            default_budget: AppConfig::default().application.global_token_limit,
            progression: ProgressionEngine::new(),
        }
    }

    /// Build the store and budget engine described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn MemoryStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryStore::new()),
            StorageBackend::File => Arc::new(FileStore::new(config.storage.resolved_path())),
        };
        let budget = TokenBudgetManager::from_config(config)?;

        let component_frameworks = config
            .components
            .iter()
            .filter_map(|c| Some((c.id.clone(), c.framework.clone()?)))
            .collect();

        Ok(Self {
            store,
            budget,
            tiers: config.tiers.clone(),
            framework: config.storage.framework.clone(),
            component_frameworks,
            default_budget: config.application.global_token_limit,
            progression: ProgressionEngine::from_config(config),
        })
    }

    pub fn with_tiers(mut self, tiers: TiersConfig) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    pub fn with_default_budget(mut self, budget: usize) -> Self {
        self.default_budget = budget;
        self
    }

    pub fn with_progression(mut self, progression: ProgressionEngine) -> Self {
        self.progression = progression;
        self
    }

    pub fn progression(&self) -> &ProgressionEngine {
        &self.progression
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn budget(&self) -> &TokenBudgetManager {
        &self.budget
    }

    fn namespace(&self, scope: &SessionScope, tier: MemoryTier) -> Namespace {
        let framework = self
            .component_frameworks
            .get(&scope.component_id)
            .unwrap_or(&self.framework);
        Namespace::new(tier)
            .with_session(scope.session_id.as_str())
            .with_framework(framework.as_str())
            .with_component(scope.component_id.as_str())
    }

    fn tiers_to_search(tier: Option<MemoryTier>) -> Vec<MemoryTier> {
        match tier {
            Some(tier) => vec![tier],
            None => MemoryTier::ALL.to_vec(),
        }
    }

    async fn memories_in(&self, scope: &SessionScope, tier: MemoryTier) -> Result<Vec<Memory>> {
        let prefix = self.namespace(scope, tier).prefix();
        Ok(self
            .store
            .list_by_prefix(&prefix)
            .await?
            .into_iter()
            .map(|stored| stored.memory)
            .collect())
    }

    // ── CRUD ──────────────────────────────────────────────────────────────

    /// Store a new memory. Unset importance and the TTL come from the tier
    /// settings; the scope is recorded in the metadata.
    ///
    /// Progression rules run afterwards and may move the new memory; their
    /// failures are logged, never returned.
    pub async fn add_memory(
        &self,
        scope: &SessionScope,
        tier: MemoryTier,
        content: impl Into<String>,
        metadata: Metadata,
        importance: Option<f32>,
    ) -> Result<Memory> {
        let memory = self.insert_memory(scope, tier, content, metadata, importance).await?;
        if let Err(e) = self.progression.on_added(self, scope, &memory).await {
            warn!(memory_id = %memory.id, error = %e, "Progression failed");
        }
        Ok(memory)
    }

    /// Run the `count` progression rules for `scope` now.
    pub async fn apply_progression(&self, scope: &SessionScope) -> Result<ProgressionReport> {
        self.progression.apply(self, scope).await
    }

    /// [`add_memory`](Self::add_memory) without progression.
    pub(crate) async fn insert_memory(
        &self,
        scope: &SessionScope,
        tier: MemoryTier,
        content: impl Into<String>,
        metadata: Metadata,
        importance: Option<f32>,
    ) -> Result<Memory> {
        let settings = self.tiers.get(tier);
        let mut memory = Memory::new(content, tier)
            .with_importance(importance.unwrap_or(settings.default_importance))
            .with_ttl(settings.ttl_seconds);
        if !memory.has_valid_importance() {
            return Err(BudgetError::InvalidImportance {
                id: memory.id,
                value: memory.importance,
            }
            .into());
        }
        memory.metadata = metadata;
        memory
            .metadata
            .insert(keys::SESSION_ID.into(), scope.session_id.clone().into());
        memory
            .metadata
            .insert(keys::COMPONENT_ID.into(), scope.component_id.clone().into());

        let key = self.namespace(scope, tier).key(&memory.id);
        self.store.set(&key, memory.clone()).await?;
        debug!(key = %key, tier = tier.as_str(), "Stored memory");
        Ok(memory)
    }

    /// Look a memory up by id, in `tier` or in every tier.
    pub async fn get_memory(
        &self,
        scope: &SessionScope,
        id: &str,
        tier: Option<MemoryTier>,
    ) -> Result<Option<Memory>> {
        for tier in Self::tiers_to_search(tier) {
            let key = self.namespace(scope, tier).key(id);
            if let Some(memory) = self.store.get(&key).await? {
                return Ok(Some(memory));
            }
        }
        Ok(None)
    }

    /// Apply `update` to an existing memory. Returns the updated memory, or
    /// `None` if the id is unknown. Rewriting restarts the TTL.
    pub async fn update_memory(
        &self,
        scope: &SessionScope,
        id: &str,
        tier: Option<MemoryTier>,
        update: MemoryUpdate,
    ) -> Result<Option<Memory>> {
        let Some(mut memory) = self.get_memory(scope, id, tier).await? else {
            return Ok(None);
        };

        if let Some(importance) = update.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(BudgetError::InvalidImportance {
                    id: id.to_string(),
                    value: importance,
                }
                .into());
            }
            memory.importance = importance;
        }
        if let Some(content) = update.content {
            memory.content = content;
        }
        memory.metadata.extend(update.metadata);

        let now = Utc::now();
        memory.updated_at = now;
        memory.last_accessed_at = now;

        let key = self.namespace(scope, memory.tier).key(id);
        self.store.set(&key, memory.clone()).await?;
        debug!(key = %key, "Updated memory");
        Ok(Some(memory))
    }

    /// Move a memory between tiers, keeping its id. The TTL becomes the
    /// destination tier's default.
    pub async fn migrate_tier(
        &self,
        scope: &SessionScope,
        id: &str,
        from: MemoryTier,
        to: MemoryTier,
    ) -> Result<Option<Memory>> {
        let from_key = self.namespace(scope, from).key(id);
        let Some(mut memory) = self.store.get(&from_key).await? else {
            return Ok(None);
        };
        if from == to {
            return Ok(Some(memory));
        }

        memory.tier = to;
        memory.ttl = self.tiers.get(to).ttl_seconds;
        memory.updated_at = Utc::now();

        let to_key = self.namespace(scope, to).key(id);
        self.store.set(&to_key, memory.clone()).await?;
        if let Err(e) = self.store.delete(&from_key).await {
            // Leave the memory in its source tier only
            if let Err(rollback) = self.store.delete(&to_key).await {
                warn!(key = %to_key, error = %rollback, "Failed to roll back migrated copy");
            }
            warn!(from = %from_key, to = %to_key, error = %e, "Migration aborted");
            return Err(e.into());
        }
        debug!(from = %from_key, to = %to_key, "Migrated memory");
        Ok(Some(memory))
    }

    /// Delete by id from `tier`, or from every tier. Returns whether
    /// anything was removed.
    pub async fn delete_memory(
        &self,
        scope: &SessionScope,
        id: &str,
        tier: Option<MemoryTier>,
    ) -> Result<bool> {
        let mut deleted = false;
        for tier in Self::tiers_to_search(tier) {
            let key = self.namespace(scope, tier).key(id);
            deleted |= self.store.delete(&key).await?;
        }
        Ok(deleted)
    }

    /// Memories of the scope, most recently accessed first.
    pub async fn list_memories(
        &self,
        scope: &SessionScope,
        tier: Option<MemoryTier>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let mut memories = Vec::new();
        for tier in Self::tiers_to_search(tier) {
            memories.extend(self.memories_in(scope, tier).await?);
        }
        memories.sort_by(|a, b| ScanOrder::Recency.compare(a, b));
        Ok(memories.into_iter().skip(offset).take(limit).collect())
    }

    /// Memories whose metadata contains every pair of `filter`, most
    /// recently accessed first.
    pub async fn search_by_metadata(
        &self,
        scope: &SessionScope,
        filter: &Metadata,
        tier: Option<MemoryTier>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let mut found = Vec::new();
        for tier in Self::tiers_to_search(tier) {
            found.extend(
                self.memories_in(scope, tier)
                    .await?
                    .into_iter()
                    .filter(|m| m.matches_metadata(filter)),
            );
        }
        found.sort_by(|a, b| ScanOrder::Recency.compare(a, b));
        found.truncate(limit);
        Ok(found)
    }

    // ── Conversation and session context ──────────────────────────────────

    /// Record one conversation turn in short-term memory.
    pub async fn add_conversation_turn(
        &self,
        scope: &SessionScope,
        role: &str,
        content: impl Into<String>,
        importance: Option<f32>,
    ) -> Result<Memory> {
        let mut metadata = Metadata::new();
        metadata.insert(keys::TYPE.into(), kinds::CONVERSATION_TURN.into());
        metadata.insert(keys::ROLE.into(), role.into());
        self.add_memory(scope, MemoryTier::ShortTerm, content, metadata, importance)
            .await
    }

    /// The `n` most recent turns of the session, newest first.
    pub async fn get_recent_turns(&self, scope: &SessionScope, n: usize) -> Result<Vec<Memory>> {
        let mut turns: Vec<Memory> = self
            .memories_in(scope, MemoryTier::ShortTerm)
            .await?
            .into_iter()
            .filter(|m| m.kind() == Some(kinds::CONVERSATION_TURN))
            .collect();
        turns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        turns.truncate(n);
        Ok(turns)
    }

    /// Set a named piece of session context in working memory, replacing the
    /// content of an existing entry with the same key.
    pub async fn store_session_context(
        &self,
        scope: &SessionScope,
        key: &str,
        value: impl Into<String>,
        importance: Option<f32>,
    ) -> Result<Memory> {
        let value: String = value.into();
        let mut filter = Metadata::new();
        filter.insert(keys::TYPE.into(), kinds::SESSION_CONTEXT.into());
        filter.insert(keys::CONTEXT_KEY.into(), key.into());

        let existing = self
            .search_by_metadata(scope, &filter, Some(MemoryTier::Working), 1)
            .await?;
        if let Some(current) = existing.first() {
            let update = MemoryUpdate {
                content: Some(value.clone()),
                importance,
                ..MemoryUpdate::default()
            };
            if let Some(updated) = self
                .update_memory(scope, &current.id, Some(MemoryTier::Working), update)
                .await?
            {
                return Ok(updated);
            }
        }

        self.add_memory(scope, MemoryTier::Working, value, filter, importance)
            .await
    }

    /// Session context entries as `context_key → content`, optionally only
    /// the one named `key`.
    pub async fn get_session_context(
        &self,
        scope: &SessionScope,
        key: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let mut filter = Metadata::new();
        filter.insert(keys::TYPE.into(), kinds::SESSION_CONTEXT.into());
        if let Some(key) = key {
            filter.insert(keys::CONTEXT_KEY.into(), key.into());
        }

        let entries = self
            .search_by_metadata(scope, &filter, Some(MemoryTier::Working), usize::MAX)
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|m| Some((m.metadata_text(keys::CONTEXT_KEY)?, m.content)))
            .collect())
    }

    // ── Prompt generation ─────────────────────────────────────────────────

    /// Build a budgeted prompt from the scope's stored memories: recent
    /// turns in chronological order, then working and long-term memories.
    ///
    /// When no relevance scores are supplied, keyword overlap with the
    /// query is used so the relevance selector has something to rank by.
    pub async fn generate_prompt(
        &self,
        scope: &SessionScope,
        request: GenerateRequest,
    ) -> Result<PromptResult> {
        let mut turns = self.get_recent_turns(scope, request.max_turns).await?;
        turns.reverse();

        let mut candidates = BTreeMap::new();
        candidates.insert(MemoryTier::ShortTerm, turns);
        if request.include_working {
            candidates.insert(
                MemoryTier::Working,
                self.memories_in(scope, MemoryTier::Working).await?,
            );
        }
        if request.include_long_term {
            candidates.insert(
                MemoryTier::LongTerm,
                self.memories_in(scope, MemoryTier::LongTerm).await?,
            );
        }

        let mut options = request.options;
        if options.relevance_scores.is_empty() {
            let all: Vec<Memory> = candidates.values().flatten().cloned().collect();
            options.relevance_scores = keyword_relevance(&request.user_query, &all);
        }

        let budget = request.total_budget.unwrap_or(self.default_budget);
        let mut prompt_request = PromptRequest::new(
            request.system_message,
            request.user_query,
            i64::try_from(budget).unwrap_or(i64::MAX),
        )
        .with_component(scope.component_id.as_str())
        .with_options(options);
        prompt_request.candidates = candidates;

        debug!(
            session = %scope.session_id,
            component = %scope.component_id,
            budget,
            "Generating prompt"
        );
        Ok(self.budget.construct_prompt(&prompt_request)?)
    }
}
