//! Configuration loading, validation, and management for memtier.
//!
//! Loads configuration from `~/.memtier/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use memtier_core::memory::MemoryTier;
use memtier_core::progression::ProgressionRule;
use memtier_core::strategy::{AdaptationKind, SelectorKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.memtier/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application-wide limits
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Token estimation parameters
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Per-tier retention defaults
    #[serde(default)]
    pub tiers: TiersConfig,

    /// Prompt budgeting defaults
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Component-specific budget rules
    #[serde(default)]
    pub components: Vec<ComponentConfig>,

    /// Storage backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tier-progression rules, applied in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progression: Vec<ProgressionRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Default prompt budget when a request names none
    #[serde(default = "default_token_limit")]
    pub global_token_limit: usize,

    /// Tokens held back from every prompt budget (e.g. for the completion)
    #[serde(default)]
    pub reserved_tokens: usize,
}

fn default_app_name() -> String {
    "memtier".into()
}
fn default_token_limit() -> usize {
    8000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            global_token_limit: default_token_limit(),
            reserved_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Characters per token (≈4 for English text under BPE tokenizers)
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f32,

    /// Fixed per-memory cost covering formatting around the content
    #[serde(default = "default_memory_overhead")]
    pub memory_overhead: usize,

    /// Whether serialized metadata counts towards a memory's cost
    #[serde(default = "default_true")]
    pub count_metadata: bool,
}

fn default_chars_per_token() -> f32 {
    4.0
}
fn default_memory_overhead() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            memory_overhead: default_memory_overhead(),
            count_metadata: true,
        }
    }
}

/// Retention defaults for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    /// Seconds to live; absent means no expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,

    /// Importance assigned when the caller gives none
    #[serde(default = "default_importance")]
    pub default_importance: f32,
}

fn default_importance() -> f32 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default = "default_short_term")]
    pub short_term: TierSettings,

    #[serde(default = "default_working")]
    pub working: TierSettings,

    #[serde(default = "default_long_term")]
    pub long_term: TierSettings,
}

fn default_short_term() -> TierSettings {
    TierSettings {
        ttl_seconds: Some(1800),
        default_importance: 0.5,
    }
}
fn default_working() -> TierSettings {
    TierSettings {
        ttl_seconds: None,
        default_importance: 0.7,
    }
}
fn default_long_term() -> TierSettings {
    TierSettings {
        ttl_seconds: None,
        default_importance: 0.8,
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            short_term: default_short_term(),
            working: default_working(),
            long_term: default_long_term(),
        }
    }
}

impl TiersConfig {
    pub fn get(&self, tier: MemoryTier) -> &TierSettings {
        match tier {
            MemoryTier::ShortTerm => &self.short_term,
            MemoryTier::Working => &self.working,
            MemoryTier::LongTerm => &self.long_term,
        }
    }
}

/// Defaults for prompt construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub selector: SelectorKind,

    #[serde(default = "default_weight")]
    pub recency_weight: f32,

    #[serde(default = "default_weight")]
    pub importance_weight: f32,

    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Strategies applied in order while the selection is over budget
    #[serde(default = "default_chain")]
    pub adaptation_chain: Vec<AdaptationKind>,

    #[serde(default = "default_section_order")]
    pub section_order: Vec<MemoryTier>,

    /// Fraction of the memory budget per tier name (`short_term`, ...).
    /// Tiers without an entry may use the whole memory budget.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tier_allocation: BTreeMap<String, f32>,

    /// Per-tier item templates keyed by tier name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,

    #[serde(default = "default_title_template")]
    pub title_template: String,

    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    /// Contents at most this long are never summarized
    #[serde(default = "default_summarize_min_chars")]
    pub summarize_min_chars: usize,

    /// Target size of a summary relative to the original
    #[serde(default = "default_summary_ratio")]
    pub summary_ratio: f32,
}

fn default_weight() -> f32 {
    0.5
}
fn default_relevance_threshold() -> f32 {
    0.1
}
fn default_chain() -> Vec<AdaptationKind> {
    vec![AdaptationKind::Reduce]
}
fn default_section_order() -> Vec<MemoryTier> {
    MemoryTier::ALL.to_vec()
}
fn default_title_template() -> String {
    "--- {tier} MEMORIES ---".into()
}
fn default_query_prefix() -> String {
    "USER: ".into()
}
fn default_summarize_min_chars() -> usize {
    200
}
fn default_summary_ratio() -> f32 {
    0.5
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            selector: SelectorKind::default(),
            recency_weight: default_weight(),
            importance_weight: default_weight(),
            relevance_threshold: default_relevance_threshold(),
            adaptation_chain: default_chain(),
            section_order: default_section_order(),
            tier_allocation: BTreeMap::new(),
            templates: BTreeMap::new(),
            title_template: default_title_template(),
            query_prefix: default_query_prefix(),
            summarize_min_chars: default_summarize_min_chars(),
            summary_ratio: default_summary_ratio(),
        }
    }
}

/// Budget rules for one agent component. Unset fields fall back to
/// [`BudgetConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub id: String,

    /// Upper bound on the prompt budget for this component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<usize>,

    /// Fraction of the memory budget per tier name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub memory_allocation: BTreeMap<String, f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency_weight: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_weight: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_threshold: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation_chain: Option<Vec<AdaptationKind>>,

    /// Framework segment used in this component's namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// JSON-lines file (persistent)
    #[default]
    File,
    /// Process memory (lost on exit)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// File store location; defaults to `<config dir>/memories.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Framework segment of namespace keys
    #[serde(default = "default_framework")]
    pub framework: String,
}

fn default_framework() -> String {
    memtier_core::namespace::DEFAULT_FRAMEWORK.into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: None,
            framework: default_framework(),
        }
    }
}

impl StorageConfig {
    /// The file store path, falling back to the config directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memories.jsonl"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.memtier/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `MEMTIER_TOKEN_LIMIT`
    /// - `MEMTIER_STORE_PATH`
    /// - `MEMTIER_FRAMEWORK`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`AppConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup("MEMTIER_TOKEN_LIMIT") {
            self.application.global_token_limit = limit.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MEMTIER_TOKEN_LIMIT must be a non-negative integer, got {limit:?}"
                ))
            })?;
        }
        if let Some(path) = lookup("MEMTIER_STORE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(framework) = lookup("MEMTIER_FRAMEWORK") {
            self.storage.framework = framework;
        }
        Ok(())
    }

    /// Get the configuration directory path (`MEMTIER_HOME` or `~/.memtier`).
    pub fn config_dir() -> PathBuf {
        match std::env::var("MEMTIER_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".memtier"),
        }
    }

    /// Look up the rules of a component by id.
    pub fn component(&self, id: &str) -> Option<&ComponentConfig> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let est = &self.estimator;
        if !est.chars_per_token.is_finite() || est.chars_per_token <= 0.0 {
            return Err(ConfigError::ValidationError(
                "estimator.chars_per_token must be > 0".into(),
            ));
        }

        for tier in MemoryTier::ALL {
            let importance = self.tiers.get(tier).default_importance;
            if !(0.0..=1.0).contains(&importance) {
                return Err(ConfigError::ValidationError(format!(
                    "tiers.{}.default_importance must be between 0.0 and 1.0",
                    tier.as_str()
                )));
            }
        }

        let budget = &self.budget;
        check_weight("budget.recency_weight", budget.recency_weight)?;
        check_weight("budget.importance_weight", budget.importance_weight)?;
        check_threshold("budget.relevance_threshold", budget.relevance_threshold)?;
        check_allocation("budget.tier_allocation", &budget.tier_allocation)?;
        parse_tier_map(&budget.templates)?;

        let mut seen = HashSet::new();
        for tier in &budget.section_order {
            if !seen.insert(*tier) {
                return Err(ConfigError::ValidationError(format!(
                    "budget.section_order lists {} more than once",
                    tier.as_str()
                )));
            }
        }

        if !(budget.summary_ratio > 0.0 && budget.summary_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "budget.summary_ratio must be within (0, 1]".into(),
            ));
        }

        let mut ids = HashSet::new();
        for component in &self.components {
            if component.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "components[].id must not be empty".into(),
                ));
            }
            if !ids.insert(component.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "component id {:?} is defined more than once",
                    component.id
                )));
            }
            let scope = format!("components.{}", component.id);
            if let Some(w) = component.recency_weight {
                check_weight(&format!("{scope}.recency_weight"), w)?;
            }
            if let Some(w) = component.importance_weight {
                check_weight(&format!("{scope}.importance_weight"), w)?;
            }
            if let Some(t) = component.relevance_threshold {
                check_threshold(&format!("{scope}.relevance_threshold"), t)?;
            }
            check_allocation(&format!("{scope}.memory_allocation"), &component.memory_allocation)?;
        }

        let mut names = HashSet::new();
        for rule in &self.progression {
            rule.check().map_err(ConfigError::ValidationError)?;
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "progression rule {:?} is defined more than once",
                    rule.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `memtier init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Convert a map keyed by tier names into one keyed by [`MemoryTier`].
pub fn parse_tier_map<T: Clone>(
    map: &BTreeMap<String, T>,
) -> Result<BTreeMap<MemoryTier, T>, ConfigError> {
    map.iter()
        .map(|(name, value)| {
            name.parse::<MemoryTier>()
                .map(|tier| (tier, value.clone()))
                .map_err(|e| ConfigError::ValidationError(e.to_string()))
        })
        .collect()
}

fn check_weight(name: &str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be a finite, non-negative number"
        )));
    }
    Ok(())
}

fn check_threshold(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be between 0.0 and 1.0"
        )));
    }
    Ok(())
}

fn check_allocation(name: &str, map: &BTreeMap<String, f32>) -> Result<(), ConfigError> {
    let parsed = parse_tier_map(map)?;
    for (tier, fraction) in &parsed {
        if !(0.0..=1.0).contains(fraction) {
            return Err(ConfigError::ValidationError(format!(
                "{name}.{} must be between 0.0 and 1.0",
                tier.as_str()
            )));
        }
    }
    let total: f32 = parsed.values().sum();
    if total > 1.0 + f32::EPSILON * 4.0 {
        return Err(ConfigError::ValidationError(format!(
            "{name} fractions sum to {total:.2}, more than 1.0"
        )));
    }
    Ok(())
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for memtier_core::Error {
    fn from(err: ConfigError) -> Self {
        memtier_core::Error::Config {
            message: err.to_string(),
        }
    }
}
