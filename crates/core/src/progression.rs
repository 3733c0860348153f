//! Tier-progression rules: when a trigger fires, move or copy memories to
//! another tier.
//!
//! Rules are plain data, declared under `[[progression]]` in the
//! configuration file:
//!
//! ```toml
//! [[progression]]
//! name = "archive_old_turns"
//! trigger = { type = "count", tier = "short_term", memory_type = "conversation_turn", threshold = 20 }
//! action = { type = "migrate", target_tier = "long_term", keep_newest = 10 }
//! ```

use serde::{Deserialize, Serialize};

use crate::memory::{Memory, MemoryTier};

/// When a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressionTrigger {
    /// `tier` holds at least `threshold` matching memories.
    Count {
        tier: MemoryTier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_type: Option<String>,
        threshold: usize,
    },
    /// A matching memory was just added to `tier`.
    MemoryAdded {
        tier: MemoryTier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_type: Option<String>,
    },
}

impl ProgressionTrigger {
    /// The tier the trigger watches; actions take memories from here.
    pub fn tier(&self) -> MemoryTier {
        match self {
            Self::Count { tier, .. } | Self::MemoryAdded { tier, .. } => *tier,
        }
    }

    pub fn memory_type(&self) -> Option<&str> {
        match self {
            Self::Count { memory_type, .. } | Self::MemoryAdded { memory_type, .. } => {
                memory_type.as_deref()
            }
        }
    }

    /// Whether `memory` is one this trigger counts or reacts to.
    pub fn matches(&self, memory: &Memory) -> bool {
        memory.tier == self.tier()
            && self
                .memory_type()
                .is_none_or(|wanted| memory.kind() == Some(wanted))
    }
}

/// What a rule does once fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressionAction {
    /// Move matching memories to `target_tier`, oldest first, leaving the
    /// newest `keep_newest` where they are.
    Migrate {
        target_tier: MemoryTier,
        #[serde(default)]
        keep_newest: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_type: Option<String>,
    },
    /// Copy matching memories into `target_tier`. Each source is copied at
    /// most once.
    Promote {
        target_tier: MemoryTier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_type: Option<String>,
    },
}

impl ProgressionAction {
    pub fn target_tier(&self) -> MemoryTier {
        match self {
            Self::Migrate { target_tier, .. } | Self::Promote { target_tier, .. } => *target_tier,
        }
    }

    /// New `type` tag for moved or copied memories.
    pub fn target_type(&self) -> Option<&str> {
        match self {
            Self::Migrate { target_type, .. } | Self::Promote { target_type, .. } => {
                target_type.as_deref()
            }
        }
    }
}

/// A named trigger/action pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionRule {
    pub name: String,
    pub trigger: ProgressionTrigger,
    pub action: ProgressionAction,
}

impl ProgressionRule {
    /// Structural problems of the rule, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("progression rule name must not be empty".into());
        }
        if let ProgressionTrigger::Count { threshold: 0, .. } = self.trigger {
            return Err(format!("progression rule {:?}: threshold must be at least 1", self.name));
        }
        if self.trigger.tier() == self.action.target_tier() {
            return Err(format!(
                "progression rule {:?}: target tier {} is the tier it watches",
                self.name,
                self.action.target_tier()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::keys;

    fn rule(toml_src: &str) -> ProgressionRule {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn parses_count_migrate_rule() {
        let parsed = rule(
            r#"
name = "archive"
trigger = { type = "count", tier = "short_term", memory_type = "conversation_turn", threshold = 20 }
action = { type = "migrate", target_tier = "long_term", keep_newest = 10 }
"#,
        );
        assert_eq!(
            parsed.trigger,
            ProgressionTrigger::Count {
                tier: MemoryTier::ShortTerm,
                memory_type: Some("conversation_turn".into()),
                threshold: 20,
            }
        );
        assert_eq!(parsed.action.target_tier(), MemoryTier::LongTerm);
        assert!(parsed.check().is_ok());
    }

    #[test]
    fn unknown_trigger_type_rejected() {
        let result: Result<ProgressionRule, _> = toml::from_str(
            r#"
name = "nightly"
trigger = { type = "schedule", cron = "0 0 * * *" }
action = { type = "promote", target_tier = "long_term" }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn check_rejects_degenerate_rules() {
        let mut parsed = rule(
            r#"
name = "copy"
trigger = { type = "memory_added", tier = "working" }
action = { type = "promote", target_tier = "working" }
"#,
        );
        assert!(parsed.check().unwrap_err().contains("tier it watches"));

        parsed.action = ProgressionAction::Promote {
            target_tier: MemoryTier::LongTerm,
            target_type: None,
        };
        parsed.trigger = ProgressionTrigger::Count {
            tier: MemoryTier::Working,
            memory_type: None,
            threshold: 0,
        };
        assert!(parsed.check().unwrap_err().contains("threshold"));
    }

    #[test]
    fn trigger_matches_tier_and_type() {
        let trigger = ProgressionTrigger::MemoryAdded {
            tier: MemoryTier::ShortTerm,
            memory_type: Some("conversation_turn".into()),
        };
        let turn = Memory::new("hi", MemoryTier::ShortTerm)
            .with_metadata(keys::TYPE, "conversation_turn");
        assert!(trigger.matches(&turn));
        assert!(!trigger.matches(&Memory::new("hi", MemoryTier::ShortTerm)));
        assert!(!trigger.matches(&Memory::new("hi", MemoryTier::Working).with_metadata(keys::TYPE, "conversation_turn")));
    }
}
