//! Core pipeline for spacebook.
//!
//! This crate ties bootstrap discovery, the realtime session, index building
//! and body downloading together into the [`Book`] entity, and keeps it
//! current as the remote space publishes new revisions.

pub mod assets;
pub mod pipeline;
pub mod toc;
pub mod update;

#[cfg(test)]
mod test_support;

pub use assets::{AssetTable, AssignedAsset};
pub use pipeline::Book;
pub use toc::{BuiltIndex, IndexOptions, build_index, render_outline, rewrite_locator};
pub use update::BookEvent;
