//! Namespaced storage keys.
//!
//! A key has the shape `{tier}:{session}:{framework}:{component}:{memory_id}`.
//! The budget engine treats keys as opaque; only stores and the memory
//! manager build them and list by prefix.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory::MemoryTier;

pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_FRAMEWORK: &str = "app";
pub const DEFAULT_COMPONENT: &str = "default";

const SEPARATOR: char = ':';

/// The addressing scope of a group of memories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub tier: MemoryTier,
    pub session_id: String,
    pub framework: String,
    pub component_id: String,
}

impl Namespace {
    pub fn new(tier: MemoryTier) -> Self {
        Self {
            tier,
            session_id: DEFAULT_SESSION.into(),
            framework: DEFAULT_FRAMEWORK.into(),
            component_id: DEFAULT_COMPONENT.into(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }

    /// Prefix shared by every key in this namespace (ends with `:`).
    pub fn prefix(&self) -> String {
        let mut out = String::new();
        for segment in [
            self.tier.as_str(),
            self.session_id.as_str(),
            self.framework.as_str(),
            self.component_id.as_str(),
        ] {
            out.push_str(&sanitize(segment));
            out.push(SEPARATOR);
        }
        out
    }

    /// Full storage key for one memory.
    pub fn key(&self, memory_id: &str) -> String {
        format!("{}{}", self.prefix(), sanitize(memory_id))
    }

    /// Prefix matching every key of a tier, across sessions and components.
    pub fn tier_prefix(tier: MemoryTier) -> String {
        format!("{}{}", tier.as_str(), SEPARATOR)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches(SEPARATOR))
    }
}

/// Segments must not contain the separator, or prefixes would bleed into
/// neighbouring namespaces.
fn sanitize(segment: &str) -> String {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return "_".into();
    }
    trimmed.replace(SEPARATOR, "_")
}
