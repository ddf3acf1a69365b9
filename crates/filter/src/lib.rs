//! Persistent Filter - incremental one-file-at-a-time text transforms
//!
//! A [`PersistentFilter`] mirrors its input tree, running every processable
//! file through a [`ContentTransformer`]. Only files in the patch since the
//! previous build are touched, and results can be reused across processes
//! through the on-disk [`CacheStrategy::ContentAddressedDiskCache`].

pub mod cache;
pub mod filter;
pub mod transformer;

pub use cache::{CacheLookup, CacheStrategy};
pub use filter::{FilterOptions, FilterStats, PersistentFilter};
pub use transformer::{ContentTransformer, TransformResult};
