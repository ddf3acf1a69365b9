//! Process-level settings read once from the environment
//!
//! Environment variables:
//! - `JOBS`: worker count for content operations
//! - `CONCAT_STATS` / `CONCAT_STATS_PATH`: enable / redirect concat size stats
//! - `BROCCOLI_PERSISTENT_FILTER_CACHE_ROOT`: persistent cache location
//! - `CI` / `FORCE_PERSISTENCE_IN_CI`: persistent caching is off in CI unless forced

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings shared by every node of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Concurrency for deferred content operations (at least 1)
    pub jobs: usize,

    /// Write a size-stats sidecar for every concat build
    pub concat_stats: bool,

    /// Directory for stats sidecars (default: `./concat-stats-for`)
    pub concat_stats_path: Option<PathBuf>,

    /// Root of the persistent transform cache
    pub cache_root: PathBuf,

    /// Whether persistent caching may be used at all
    pub persistence_allowed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            concat_stats: false,
            concat_stats_path: None,
            cache_root: std::env::temp_dir().join("loam-persistent-filter"),
            persistence_allowed: true,
        }
    }
}

/// CPU count minus one, never below one
pub fn default_jobs() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

impl Settings {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(jobs) = set("JOBS").and_then(|v| v.trim().parse::<usize>().ok()) {
            self.jobs = jobs.max(1);
        }
        if set("CONCAT_STATS").is_some() {
            self.concat_stats = true;
        }
        if let Some(path) = set("CONCAT_STATS_PATH") {
            self.concat_stats_path = Some(PathBuf::from(path));
        }
        if let Some(root) = set("BROCCOLI_PERSISTENT_FILTER_CACHE_ROOT") {
            self.cache_root = PathBuf::from(root);
        }
        if set("CI").is_some() && set("FORCE_PERSISTENCE_IN_CI").is_none() {
            self.persistence_allowed = false;
        }
    }

    /// Directory stats sidecars are written to
    pub fn stats_dir(&self) -> PathBuf {
        match &self.concat_stats_path {
            Some(path) => path.clone(),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("concat-stats-for"),
        }
    }
}
