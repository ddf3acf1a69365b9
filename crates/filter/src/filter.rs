//! The Persistent Filter node

use crate::cache::{CacheLookup, CacheStrategy};
use crate::transformer::ContentTransformer;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use loam_core::link::{clear_dir, link_or_copy, remove_path};
use loam_core::{
    BuildContext, BuildOutcome, Change, Error, IoResultExt, LinkMode, Node, NodeId, Operation,
    Patch, Result, Tree,
};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistent Filter configuration
#[derive(Debug, Clone)]
pub struct FilterOptions {
    /// Extensions (without the dot) of files to transform; `None` = all
    pub extensions: Option<Vec<String>>,
    /// Replacement extension for transformed files
    pub target_extension: Option<String>,
    /// Request the on-disk cache
    pub persist: bool,
    /// Defer content operations into the bounded queue
    pub async_mode: bool,
    /// Queue width; defaults to the `jobs` setting
    pub concurrency: Option<usize>,
    pub annotation: Option<String>,
    pub link_mode: LinkMode,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            extensions: None,
            target_extension: None,
            persist: false,
            async_mode: true,
            concurrency: None,
            annotation: None,
            link_mode: LinkMode::default(),
        }
    }
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn target_extension(mut self, extension: impl Into<String>) -> Self {
        self.target_extension = Some(extension.into());
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.async_mode = enabled;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn link_mode(mut self, mode: LinkMode) -> Self {
        self.link_mode = mode;
        self
    }
}

/// Counters for the most recent build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Files run through the transform pipeline (cached or not)
    pub processed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Output files written
    pub writes: usize,
    /// `change` operations whose output was already up to date
    pub skipped_writes: usize,
    /// Non-processable files linked or copied verbatim
    pub linked: usize,
}

impl FilterStats {
    fn record(&mut self, outcome: ContentOutcome) {
        match outcome {
            ContentOutcome::Linked => self.linked += 1,
            ContentOutcome::Processed { lookup, wrote } => {
                self.processed += 1;
                match lookup {
                    CacheLookup::Hit => self.cache_hits += 1,
                    CacheLookup::Miss => self.cache_misses += 1,
                    CacheLookup::Uncached => {}
                }
                if wrote {
                    self.writes += 1;
                } else {
                    self.skipped_writes += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ContentOutcome {
    Linked,
    Processed { lookup: CacheLookup, wrote: bool },
}

/// Transforms files one at a time, incrementally
pub struct PersistentFilter {
    ctx: Arc<BuildContext>,
    id: NodeId,
    label: String,
    input: PathBuf,
    output_path: PathBuf,
    options: FilterOptions,
    concurrency: usize,
    transformer: Arc<dyn ContentTransformer>,
    cache: CacheStrategy,
    /// Input snapshot of the last successful build
    current: Tree,
    stats: FilterStats,
}

impl PersistentFilter {
    pub fn new(
        ctx: Arc<BuildContext>,
        input: impl Into<PathBuf>,
        transformer: Arc<dyn ContentTransformer>,
        options: FilterOptions,
    ) -> Result<Self> {
        let label = match &options.annotation {
            Some(a) => format!("{} ({a})", transformer.name()),
            None => transformer.name().to_string(),
        };

        if let Some(extensions) = &options.extensions {
            if let Some(bad) = extensions.iter().find(|e| e.is_empty() || e.starts_with('.')) {
                return Err(Error::config(
                    &label,
                    format!("extensions are given without a leading dot, got {bad:?}"),
                ));
            }
        }
        if options.target_extension.is_some() && options.extensions.is_none() {
            return Err(Error::config(&label, "target_extension requires extensions"));
        }
        if options.concurrency == Some(0) {
            return Err(Error::config(&label, "concurrency must be at least 1"));
        }

        let cache = CacheStrategy::select(options.persist, ctx.settings(), transformer.as_ref())?;
        let concurrency = options.concurrency.unwrap_or(ctx.settings().jobs).max(1);
        let slot = ctx.allocate(&label)?;
        debug!(
            "{}: concurrency={} persistent={}",
            label,
            concurrency,
            cache.is_persistent()
        );

        Ok(Self {
            ctx,
            id: slot.id,
            label,
            input: input.into(),
            output_path: slot.output_path,
            options,
            concurrency,
            transformer,
            cache,
            current: Tree::new(),
            stats: FilterStats::default(),
        })
    }

    /// Counters of the most recent successful build
    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    pub fn cache(&self) -> &CacheStrategy {
        &self.cache
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    fn matching_extension(&self, relative_path: &str) -> Option<&str> {
        let extensions = self.options.extensions.as_ref()?;
        extensions
            .iter()
            .find(|ext| {
                relative_path.len() > ext.len() + 1
                    && relative_path.ends_with(ext.as_str())
                    && relative_path.as_bytes()[relative_path.len() - ext.len() - 1] == b'.'
            })
            .map(String::as_str)
    }

    /// Whether the transformer applies to a file
    pub fn can_process_file(&self, relative_path: &str) -> bool {
        if relative_path.ends_with('/') {
            return false;
        }
        self.options.extensions.is_none() || self.matching_extension(relative_path).is_some()
    }

    /// Output path for an input file
    pub fn dest_file_path(&self, relative_path: &str) -> String {
        match (self.matching_extension(relative_path), &self.options.target_extension) {
            (Some(ext), Some(target)) => {
                let stem = &relative_path[..relative_path.len() - ext.len()];
                format!("{stem}{target}")
            }
            _ => relative_path.to_string(),
        }
    }

    /// Output location of whatever `relative_path` produced
    fn output_of(&self, relative_path: &str) -> PathBuf {
        if self.can_process_file(relative_path) {
            self.output_path.join(self.dest_file_path(relative_path))
        } else {
            self.output_path.join(relative_path)
        }
    }

    fn apply_structural(&self, change: &Change) -> Result<()> {
        let relative_path = change.relative_path();
        match change.operation {
            Operation::Mkdir => {
                let dir = self.output_path.join(relative_path.trim_end_matches('/'));
                std::fs::create_dir_all(&dir).at(&dir)
            }
            Operation::Rmdir => {
                let dir = self.output_path.join(relative_path.trim_end_matches('/'));
                match std::fs::remove_dir(&dir) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::io(dir, e)),
                    _ => Ok(()),
                }
            }
            Operation::Unlink => {
                let target = self.output_of(relative_path);
                remove_path(&target).at(&target)
            }
            Operation::Create | Operation::Change => Ok(()),
        }
    }

    async fn apply_content(&self, change: &Change) -> Result<ContentOutcome> {
        let relative_path = change.relative_path();
        let source = self.input.join(relative_path);

        if !self.can_process_file(relative_path) {
            let target = self.output_path.join(relative_path);
            remove_path(&target).at(&target)?;
            ensure_parent(&target).await?;
            link_or_copy(&source, &target, self.options.link_mode).at(&target)?;
            return Ok(ContentOutcome::Linked);
        }

        let bytes = tokio::fs::read(&source).await.at(&source)?;
        let content = String::from_utf8_lossy(&bytes);
        let (result, lookup) =
            self.cache
                .process(self.transformer.as_ref(), &content, relative_path, &self.input)?;
        let result = self
            .transformer
            .post_process(result, relative_path)
            .map_err(|e| Error::Transform {
                relative_path: relative_path.to_string(),
                src_dir: self.input.clone(),
                source: e.into(),
            })?
            .ok_or_else(|| Error::MissingPostProcessOutput {
                relative_path: relative_path.to_string(),
            })?;

        let target = self.output_path.join(self.dest_file_path(relative_path));
        if change.operation == Operation::Change {
            if let Ok(existing) = tokio::fs::read(&target).await {
                if existing == result.output.as_bytes() {
                    debug!("{}: {} unchanged, skipping write", self.label, relative_path);
                    return Ok(ContentOutcome::Processed { lookup, wrote: false });
                }
            }
        }

        // Never write through a link left by an earlier verbatim copy
        remove_path(&target).at(&target)?;
        ensure_parent(&target).await?;
        tokio::fs::write(&target, result.output.as_bytes()).await.at(&target)?;
        Ok(ContentOutcome::Processed { lookup, wrote: true })
    }

    /// Apply one patch; structural operations first, in patch order, then
    /// the content work (queued unless async mode is off)
    async fn apply(&self, patch: &Patch) -> Result<FilterStats> {
        let mut stats = FilterStats::default();
        let mut deferred = Vec::new();

        for change in patch {
            if change.operation.is_structural() {
                self.apply_structural(change)?;
            } else if self.options.async_mode {
                deferred.push(change);
            } else {
                stats.record(self.apply_content(change).await?);
            }
        }

        let pending: Vec<_> = deferred
            .into_iter()
            .map(|change| self.apply_content(change))
            .collect();
        let outcomes: Vec<ContentOutcome> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        for outcome in outcomes {
            stats.record(outcome);
        }
        Ok(stats)
    }
}

/// Create a missing destination directory
async fn ensure_parent(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) if !parent.exists() => tokio::fs::create_dir_all(parent).await.at(parent),
        _ => Ok(()),
    }
}

#[async_trait]
impl Node for PersistentFilter {
    fn label(&self) -> &str {
        &self.label
    }

    fn id(&self) -> NodeId {
        self.id
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }

    async fn build(&mut self) -> Result<BuildOutcome> {
        let next = Tree::from_dir(&self.input)?;
        let patch = self.current.calculate_patch(&next);
        if patch.is_empty() {
            debug!("{}: no changes", self.label);
            self.stats = FilterStats::default();
            return Ok(BuildOutcome::default());
        }

        match self.apply(&patch).await {
            Ok(stats) => {
                info!(
                    "{}: {} (processed={} hits={} misses={} skipped={})",
                    self.label,
                    patch.summary(),
                    stats.processed,
                    stats.cache_hits,
                    stats.cache_misses,
                    stats.skipped_writes
                );
                self.current = next;
                self.stats = stats;
                Ok(BuildOutcome::new(patch.len()))
            }
            Err(e) => {
                // Part of the patch may have landed; start over next time
                warn!("{}: build failed, output will be rebuilt", self.label);
                self.current = Tree::new();
                self.stats = FilterStats::default();
                clear_dir(&self.output_path).at(&self.output_path)?;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for PersistentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentFilter")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("input", &self.input)
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish()
    }
}
