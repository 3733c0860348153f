//! Memory records and retention tiers.
//!
//! A [`Memory`] is a single retained unit of content. The budget engine only
//! ever reads memories: it decides which of the given records appear in a
//! prompt and in what reduced form, but never creates or persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BudgetError;

/// Open metadata mapping. Deliberately schemaless; see [`keys`] for the
/// well-known entries.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Well-known metadata keys.
pub mod keys {
    /// Distinguishes conversational turns from stored facts.
    pub const TYPE: &str = "type";
    /// Speaker role for conversation turns (`user`, `assistant`, ...).
    pub const ROLE: &str = "role";
    pub const SESSION_ID: &str = "session_id";
    pub const COMPONENT_ID: &str = "component_id";
    /// Key of a session-context entry in working memory.
    pub const CONTEXT_KEY: &str = "context_key";
    /// Id of the memory a promoted copy was made from.
    pub const PROMOTED_FROM: &str = "promoted_from";
}

/// Well-known values of the `type` metadata key.
pub mod kinds {
    pub const CONVERSATION_TURN: &str = "conversation_turn";
    pub const SESSION_CONTEXT: &str = "session_context";
    pub const GENERIC: &str = "generic";
}

/// Retention tier of a memory.
///
/// Declaration order doubles as the default section order in prompts:
/// short-term conversation first, then working facts, then long-term
/// background knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Conversation turns, short-lived.
    ShortTerm,
    /// Session context, lives as long as the session.
    Working,
    /// Persistent background knowledge.
    LongTerm,
}

impl MemoryTier {
    /// All tiers in default section order.
    pub const ALL: [MemoryTier; 3] = [Self::ShortTerm, Self::Working, Self::LongTerm];

    /// Order in which whole tiers are sacrificed under budget pressure.
    pub const DROP_ORDER: [MemoryTier; 3] = [Self::LongTerm, Self::Working, Self::ShortTerm];

    /// Storage name (`short_term`, `working`, `long_term`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::Working => "working",
            Self::LongTerm => "long_term",
        }
    }

    /// Upper-case label used in section titles (`SHORT_TERM`, ...).
    pub fn label(&self) -> &'static str {
        match self {
            Self::ShortTerm => "SHORT_TERM",
            Self::Working => "WORKING",
            Self::LongTerm => "LONG_TERM",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MemoryTier {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "short_term" | "stm" => Ok(Self::ShortTerm),
            "working" => Ok(Self::Working),
            "long_term" | "ltm" => Ok(Self::LongTerm),
            _ => Err(BudgetError::UnknownTier(s.to_string())),
        }
    }
}

/// A single retained unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique within its namespace, never reused.
    pub id: String,

    /// The text payload.
    pub content: String,

    /// Open metadata used for filtering and behavior tags.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,

    /// Caller-assigned importance in [0.0, 1.0].
    #[serde(default)]
    pub importance: f32,

    pub tier: MemoryTier,

    /// Seconds to live; enforced by the store, `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory with a fresh v4 id and all timestamps set to now.
    pub fn new(content: impl Into<String>, tier: MemoryTier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: Metadata::new(),
            importance: 0.0,
            tier,
            ttl: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set `created_at`, `updated_at` and `last_accessed_at` at once.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_at = timestamp;
        self.updated_at = timestamp;
        self.last_accessed_at = timestamp;
        self
    }

    pub fn with_last_accessed_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.last_accessed_at = timestamp;
        self
    }

    /// A metadata value rendered as text. Strings are returned without
    /// quotes; other JSON values use their compact JSON form.
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// The `role` metadata entry, if it is a string.
    pub fn role(&self) -> Option<&str> {
        self.metadata.get(keys::ROLE).and_then(|v| v.as_str())
    }

    /// The `type` metadata entry, if it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(keys::TYPE).and_then(|v| v.as_str())
    }

    /// Whether every `(key, value)` pair of `filter` is present in the metadata.
    pub fn matches_metadata(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|own| own == v))
    }

    /// Whether `importance` respects the [0, 1] invariant.
    pub fn has_valid_importance(&self) -> bool {
        (0.0..=1.0).contains(&self.importance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_loose_spellings() {
        assert_eq!("short_term".parse::<MemoryTier>().unwrap(), MemoryTier::ShortTerm);
        assert_eq!("LONG-TERM".parse::<MemoryTier>().unwrap(), MemoryTier::LongTerm);
        assert_eq!(" Working ".parse::<MemoryTier>().unwrap(), MemoryTier::Working);
        assert!(matches!(
            "episodic".parse::<MemoryTier>(),
            Err(BudgetError::UnknownTier(_))
        ));
    }

    #[test]
    fn tier_ordering_follows_section_order() {
        let mut tiers = vec![MemoryTier::LongTerm, MemoryTier::ShortTerm, MemoryTier::Working];
        tiers.sort();
        assert_eq!(tiers, MemoryTier::ALL.to_vec());
    }

    #[test]
    fn tier_serializes_snake_case() {
        let json = serde_json::to_string(&MemoryTier::LongTerm).unwrap();
        assert_eq!(json, "\"long_term\"");
        assert_eq!(MemoryTier::LongTerm.to_string(), "LONG_TERM");
    }

    #[test]
    fn memory_serialization_roundtrip() {
        let memory = Memory::new("The user prefers Rust over C++", MemoryTier::Working)
            .with_id("mem_001")
            .with_importance(0.8)
            .with_metadata(keys::TYPE, kinds::SESSION_CONTEXT);
        let json = serde_json::to_string(&memory).unwrap();
        assert!(json.contains("Rust over C++"));
        assert!(json.contains("\"working\""));

        let parsed: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, memory);
    }

    #[test]
    fn metadata_helpers() {
        let memory = Memory::new("hi", MemoryTier::ShortTerm)
            .with_metadata(keys::ROLE, "user")
            .with_metadata("turn", 3);
        assert_eq!(memory.role(), Some("user"));
        assert_eq!(memory.kind(), None);
        assert_eq!(memory.metadata_text("turn").as_deref(), Some("3"));

        let mut filter = Metadata::new();
        filter.insert(keys::ROLE.into(), "user".into());
        assert!(memory.matches_metadata(&filter));
        filter.insert("turn".into(), 4.into());
        assert!(!memory.matches_metadata(&filter));
    }

    #[test]
    fn importance_invariant_check() {
        assert!(Memory::new("x", MemoryTier::Working).with_importance(1.0).has_valid_importance());
        assert!(!Memory::new("x", MemoryTier::Working).with_importance(1.5).has_valid_importance());
        assert!(!Memory::new("x", MemoryTier::Working).with_importance(f32::NAN).has_valid_importance());
    }
}
