//! Build driver
//!
//! Nodes are added in dependency order: every node's input is either a
//! source directory or the output of a node added before it. A build walks
//! the list once, front to back.

use loam_core::{BuildContext, BuildOutcome, Node};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Failure of one pipeline build
#[derive(Debug, Error)]
pub enum BuildError {
    /// A node failed; it rebuilds from scratch on the next build
    #[error("build failed in {node}")]
    Node {
        node: String,
        #[source]
        source: loam_core::Error,
    },

    /// Cancellation was requested before `next` started
    #[error("build canceled before {next}")]
    Canceled { next: String },
}

impl BuildError {
    /// Label of the node involved
    pub fn node(&self) -> &str {
        match self {
            BuildError::Node { node, .. } => node,
            BuildError::Canceled { next } => next,
        }
    }
}

#[derive(Debug, Default)]
struct CancelState {
    building: AtomicBool,
    requested: AtomicBool,
}

/// Requests that a running build stop at the next node boundary
///
/// Canceling while no build runs does nothing; every build starts with a
/// clear request.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<CancelState>);

impl CancelHandle {
    pub fn cancel(&self) {
        if self.0.building.load(Ordering::SeqCst) {
            self.0.requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    fn start(&self) -> Running<'_> {
        self.0.requested.store(false, Ordering::SeqCst);
        self.0.building.store(true, Ordering::SeqCst);
        Running(&self.0)
    }
}

/// Marks the end of a build however it returns
struct Running<'a>(&'a CancelState);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.building.store(false, Ordering::SeqCst);
        self.0.requested.store(false, Ordering::SeqCst);
    }
}

/// What one node did during a build
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub label: String,
    pub output_path: PathBuf,
    pub outcome: BuildOutcome,
    pub elapsed: Duration,
}

/// Ordered set of nodes sharing one build context
pub struct Builder {
    ctx: Arc<BuildContext>,
    nodes: Vec<Box<dyn Node>>,
    cancel: CancelHandle,
}

impl Builder {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self {
            ctx,
            nodes: Vec::new(),
            cancel: CancelHandle::default(),
        }
    }

    /// Append a node; it may only read from nodes added earlier
    pub fn add(&mut self, node: impl Node + 'static) -> &mut Self {
        self.nodes.push(Box::new(node));
        self
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.label())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Output directory of the last node
    pub fn output_path(&self) -> Option<&Path> {
        self.nodes.last().map(|n| n.output_path())
    }

    /// Build every node once, in order
    ///
    /// A canceled build leaves the nodes that already ran with their new
    /// snapshots; the remaining ones catch up on the next build.
    pub async fn build(&mut self) -> Result<Vec<NodeReport>, BuildError> {
        let mut reports = Vec::with_capacity(self.nodes.len());
        let _running = self.cancel.start();

        for node in &mut self.nodes {
            if self.cancel.is_canceled() {
                debug!("cancel requested, stopping before {}", node.label());
                return Err(BuildError::Canceled {
                    next: node.label().to_string(),
                });
            }

            let start = Instant::now();
            let outcome = node.build().await.map_err(|source| BuildError::Node {
                node: node.label().to_string(),
                source,
            })?;
            let elapsed = start.elapsed();

            debug!("{} built in {:?}", node.label(), elapsed);
            reports.push(NodeReport {
                label: node.label().to_string(),
                output_path: node.output_path().to_path_buf(),
                outcome,
                elapsed,
            });
        }

        let changes: usize = reports.iter().map(|r| r.outcome.changes).sum();
        info!("built {} nodes ({} changes)", reports.len(), changes);
        Ok(reports)
    }
}
