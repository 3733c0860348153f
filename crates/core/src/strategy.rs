//! Strategy names shared by the budget engine, configuration and CLI.
//!
//! These are closed tag sets: the engine dispatches on them, configuration
//! files and requests name them as snake_case strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BudgetError;

/// Which selector ranks candidates within a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Weighted recency + importance.
    #[default]
    Priority,
    /// Caller-supplied relevance scores.
    Relevance,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Relevance => "relevance",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorKind {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "relevance" => Ok(Self::Relevance),
            _ => Err(BudgetError::UnknownSelector(s.to_string())),
        }
    }
}

/// Which adaptation strategy shrinks an over-budget selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationKind {
    /// Drop the lowest-priority memories one at a time.
    Reduce,
    /// Replace long contents with summaries.
    Summarize,
    /// Drop whole tiers, long-term first.
    PrioritizeTier,
}

impl AdaptationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reduce => "reduce",
            Self::Summarize => "summarize",
            Self::PrioritizeTier => "prioritize_tier",
        }
    }

    /// Parse a comma-separated chain such as `"summarize,reduce"`.
    pub fn parse_chain(s: &str) -> Result<Vec<Self>, BudgetError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for AdaptationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdaptationKind {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reduce" => Ok(Self::Reduce),
            "summarize" => Ok(Self::Summarize),
            "prioritize_tier" => Ok(Self::PrioritizeTier),
            _ => Err(BudgetError::UnknownStrategy(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_names() {
        assert_eq!("Relevance".parse::<SelectorKind>().unwrap(), SelectorKind::Relevance);
        assert_eq!(SelectorKind::default(), SelectorKind::Priority);
        assert!(matches!(
            "semantic".parse::<SelectorKind>(),
            Err(BudgetError::UnknownSelector(name)) if name == "semantic"
        ));
    }

    #[test]
    fn chain_parsing() {
        let chain = AdaptationKind::parse_chain("summarize, prioritize-tier ,reduce").unwrap();
        assert_eq!(
            chain,
            vec![
                AdaptationKind::Summarize,
                AdaptationKind::PrioritizeTier,
                AdaptationKind::Reduce
            ]
        );
        assert!(AdaptationKind::parse_chain("").unwrap().is_empty());
        assert!(AdaptationKind::parse_chain("reduce,compress").is_err());
    }

    #[test]
    fn strategy_serde_names() {
        let json = serde_json::to_string(&AdaptationKind::PrioritizeTier).unwrap();
        assert_eq!(json, "\"prioritize_tier\"");
        let parsed: Vec<AdaptationKind> = serde_json::from_str(r#"["reduce","summarize"]"#).unwrap();
        assert_eq!(parsed, vec![AdaptationKind::Reduce, AdaptationKind::Summarize]);
        assert!(serde_json::from_str::<AdaptationKind>("\"shrink\"").is_err());
    }
}
