//! Shared types, error model, and configuration for spacebook.
//!
//! This crate is the foundation depended on by all other spacebook crates.
//! It provides:
//! - [`SpacebookError`] — the unified error type
//! - Domain types ([`PageRecord`], [`IndexNode`], [`PublishedBook`], [`BookId`])
//! - Configuration ([`AppConfig`], [`BookConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BookConfig, BookEntry, DefaultsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{Result, SpacebookError};
pub use types::{
    AssetRecord, BookId, IndexNode, PageKind, PageNode, PageRecord, PageStats, PublishedBook,
    RevisionContent, RevisionPayload, SectionNode, SpaceInfo, VersionContent, count_nodes,
    pages_in_order,
};
