//! Loam Core - shared primitives for incremental tree-transform nodes
//!
//! This crate provides the foundation the nodes build on:
//! - Tree snapshots and patch computation
//! - Patch application with symlink-or-copy linking
//! - BLAKE3 cache keys and the on-disk content-addressed store
//! - The per-pipeline build context and environment settings
//! - The `Node` trait and the shared error type

pub mod apply;
pub mod context;
pub mod error;
pub mod hash;
pub mod link;
pub mod node;
pub mod settings;
pub mod store;
pub mod tree;

// Re-export main types for convenience
pub use apply::apply_patch;
pub use context::{BuildContext, NodeId, NodeSlot, StatsRecord};
pub use error::{BoxError, Error, IoResultExt, Result};
pub use hash::{content_key, hash_bytes, Blake3Hash};
pub use link::{clear_dir, link_or_copy, remove_path, LinkMode, Linked};
pub use node::{BuildOutcome, Node};
pub use settings::Settings;
pub use store::DiskStore;
pub use tree::{Change, Entry, EntryKind, Operation, Patch, Tree};
