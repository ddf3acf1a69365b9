//! Per-pipeline build context
//!
//! Everything that would otherwise be process-wide (settings, node ids,
//! the stats registry) lives here. The driver creates one context and hands
//! an `Arc` to every node it constructs, so several pipelines can coexist
//! in one process.

use crate::error::{IoResultExt, Result};
use crate::settings::Settings;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifier of a node within one context
pub type NodeId = usize;

/// Directory and id handed to a newly constructed node
#[derive(Debug, Clone)]
pub struct NodeSlot {
    pub id: NodeId,
    pub output_path: PathBuf,
}

/// Per-file byte sizes of one concatenation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    #[serde(skip)]
    pub node_id: NodeId,
    pub output_file: String,
    pub sizes: BTreeMap<String, u64>,
}

/// Shared state of one pipeline
#[derive(Debug)]
pub struct BuildContext {
    settings: Settings,
    work_dir: PathBuf,
    next_id: AtomicUsize,
    stats: Mutex<Vec<StatsRecord>>,
}

impl BuildContext {
    /// Create a context whose nodes write below `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            work_dir: work_dir.into(),
            next_id: AtomicUsize::new(0),
            stats: Mutex::new(Vec::new()),
        })
    }

    /// Settings for this pipeline
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Root of all node output directories
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Reserve an id and a fresh, empty output directory for a node
    pub fn allocate(&self, label: &str) -> Result<NodeSlot> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let slug: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let output_path = self.work_dir.join(format!("{id:03}-{slug}")).join("output");

        if output_path.exists() {
            std::fs::remove_dir_all(&output_path).at(&output_path)?;
        }
        std::fs::create_dir_all(&output_path).at(&output_path)?;
        Ok(NodeSlot { id, output_path })
    }

    /// Add a concat stats record to the registry
    pub fn record_stats(&self, record: StatsRecord) {
        let mut stats = self.stats.lock();
        stats.retain(|r| !(r.node_id == record.node_id && r.output_file == record.output_file));
        stats.push(record);
    }

    /// Snapshot of the stats registry
    pub fn stats(&self) -> Vec<StatsRecord> {
        self.stats.lock().clone()
    }
}
