//! Common types and utilities for the pyz type checker.
//!
//! This crate provides foundational types used across all pyz crates:
//! - String interning (`Atom`, `Interner`, `ShardedInterner`)

// String interning for identifier deduplication
pub mod interner;
pub use interner::{Atom, Interner, ShardedInterner};
