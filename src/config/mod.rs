//! Configuration module for archive runs
//!
//! This module provides the `ArchiveConfig` struct and its type-safe builder
//! with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::{ArchiveConfigBuilder, WithDownloadRoot};
pub use types::{AnchorPolicy, ArchiveConfig};
