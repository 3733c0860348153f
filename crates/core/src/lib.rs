//! # memtier Core
//!
//! Domain types, traits, and error definitions for memtier, the tiered
//! short-lived memory for AI agents. This crate has **no engine logic** —
//! it defines the domain model that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Storage is defined as a trait here; backends live in `memtier-memory`.
//! Strategy names are closed enums shared by the budget engine, the
//! configuration file and the CLI.

pub mod error;
pub mod memory;
pub mod namespace;
pub mod progression;
pub mod store;
pub mod strategy;

// Re-export key types at crate root for ergonomics
pub use error::{BudgetError, Error, Result, StoreError};
pub use memory::{Memory, MemoryTier, Metadata};
pub use namespace::Namespace;
pub use progression::{ProgressionAction, ProgressionRule, ProgressionTrigger};
pub use store::{MemoryStore, ScanOrder, StoredMemory};
pub use strategy::{AdaptationKind, SelectorKind};
