//! The interface every tree-transform node implements

use crate::context::NodeId;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// What one `build()` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Number of patch operations applied (0 means the output is untouched)
    pub changes: usize,
}

impl BuildOutcome {
    pub fn new(changes: usize) -> Self {
        Self { changes }
    }

    /// Whether the build left the output untouched
    pub fn is_noop(&self) -> bool {
        self.changes == 0
    }
}

/// One node in the build graph
///
/// A node reads its input directories, compares them against the snapshot
/// kept from its previous build and brings its own output directory up to
/// date. Nodes are not interruptible: a build runs until it completes or
/// fails.
#[async_trait]
pub trait Node: Send {
    /// Human-readable label, e.g. `Funnel (vendor)`
    fn label(&self) -> &str;

    /// Id assigned by the build context
    fn id(&self) -> NodeId;

    /// Directory holding this node's output
    fn output_path(&self) -> &Path;

    /// Bring the output directory up to date with the inputs
    async fn build(&mut self) -> Result<BuildOutcome>;
}
