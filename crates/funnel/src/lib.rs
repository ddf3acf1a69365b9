//! Funnel - select, relocate and rename part of an input tree
//!
//! A funnel never changes file contents. Its output is either a single link
//! to the input (when no filtering or renaming is configured) or a tree of
//! per-file links maintained incrementally from build to build.

pub mod matcher;

pub use matcher::{Matcher, PathPredicate};

use ahash::AHashMap;
use async_trait::async_trait;
use loam_core::link::{clear_dir, link_or_copy, remove_path};
use loam_core::tree::has_glob_chars;
use loam_core::{
    apply_patch, BuildContext, BuildOutcome, Entry, Error, IoResultExt, LinkMode, Linked, Node,
    NodeId, Result, Tree,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Remaps a relative path before it is written
pub type DestinationFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Funnel configuration
#[derive(Clone, Default)]
pub struct FunnelOptions {
    /// Subdirectory of the input to read
    pub src_dir: Option<String>,
    /// Subdirectory of the output to write
    pub dest_dir: Option<String>,
    pub include: Vec<Matcher>,
    pub exclude: Vec<Matcher>,
    /// Explicit allow-list; excludes `include`/`exclude`
    pub files: Option<Vec<String>>,
    pub get_destination_path: Option<DestinationFn>,
    /// Tolerate a missing `src_dir` and an empty selection
    pub allow_empty: bool,
    /// Shown in the node label
    pub annotation: Option<String>,
    pub link_mode: LinkMode,
}

impl FunnelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_dir(mut self, dir: impl Into<String>) -> Self {
        self.src_dir = Some(dir.into());
        self
    }

    pub fn dest_dir(mut self, dir: impl Into<String>) -> Self {
        self.dest_dir = Some(dir.into());
        self
    }

    pub fn include(mut self, matcher: Matcher) -> Self {
        self.include.push(matcher);
        self
    }

    pub fn exclude(mut self, matcher: Matcher) -> Self {
        self.exclude.push(matcher);
        self
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = Some(files.into_iter().map(Into::into).collect());
        self
    }

    pub fn get_destination_path<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.get_destination_path = Some(Arc::new(f));
        self
    }

    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
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

    /// No option that filters or renames is set
    fn is_passthrough(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.files.is_none()
            && self.get_destination_path.is_none()
    }

    /// Whether a source-relative file path is kept
    fn selects(&self, relative_path: &str) -> bool {
        if let Some(files) = &self.files {
            return files.iter().any(|f| f == relative_path);
        }
        if self.exclude.iter().any(|m| m.matches(relative_path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|m| m.matches(relative_path))
    }

    fn describe_selection(&self) -> String {
        match &self.files {
            Some(files) => format!("files [{}]", files.join(", ")),
            None => {
                let list = |ms: &[Matcher]| {
                    ms.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                };
                format!("include [{}] exclude [{}]", list(&self.include), list(&self.exclude))
            }
        }
    }
}

impl fmt::Debug for FunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunnelOptions")
            .field("src_dir", &self.src_dir)
            .field("dest_dir", &self.dest_dir)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("files", &self.files)
            .field("get_destination_path", &self.get_destination_path.is_some())
            .field("allow_empty", &self.allow_empty)
            .finish()
    }
}

/// Trim slashes; `""` and `"."` mean "no subdirectory"
fn normalize_dir(dir: &Option<String>) -> Option<String> {
    dir.as_deref()
        .map(|d| d.trim_matches('/'))
        .filter(|d| !d.is_empty() && *d != ".")
        .map(str::to_string)
}

/// The Funnel node
pub struct Funnel {
    ctx: Arc<BuildContext>,
    id: NodeId,
    label: String,
    input: PathBuf,
    output_path: PathBuf,
    options: FunnelOptions,
    src_dir: Option<String>,
    dest_dir: Option<String>,
    /// Destination snapshot of the last successful build
    current: Tree,
    /// Fast path: how the output root is currently linked
    root_link: Option<Linked>,
}

impl Funnel {
    /// Validate `options` and allocate the output directory
    pub fn new(ctx: Arc<BuildContext>, input: impl Into<PathBuf>, options: FunnelOptions) -> Result<Self> {
        let label = match &options.annotation {
            Some(a) => format!("Funnel ({a})"),
            None => "Funnel".to_string(),
        };

        if let Some(files) = &options.files {
            if !options.include.is_empty() || !options.exclude.is_empty() {
                return Err(Error::config(
                    &label,
                    "cannot pass files option together with include or exclude",
                ));
            }
            if let Some(bad) = files.iter().find(|f| has_glob_chars(f)) {
                return Err(Error::config(
                    &label,
                    format!("files must be a list of paths, not globs: {bad:?}"),
                ));
            }
        }
        for dir in [&options.src_dir, &options.dest_dir].into_iter().flatten() {
            if Path::new(dir).is_absolute() || dir.split('/').any(|c| c == "..") {
                return Err(Error::config(
                    &label,
                    format!("{dir:?} must be a relative path inside the tree"),
                ));
            }
        }

        let slot = ctx.allocate(&label)?;
        Ok(Self {
            src_dir: normalize_dir(&options.src_dir),
            dest_dir: normalize_dir(&options.dest_dir),
            ctx,
            id: slot.id,
            label,
            input: input.into(),
            output_path: slot.output_path,
            options,
            current: Tree::new(),
            root_link: None,
        })
    }

    /// Shared build context
    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    fn src_root(&self) -> PathBuf {
        match &self.src_dir {
            Some(dir) => self.input.join(dir),
            None => self.input.clone(),
        }
    }

    fn dest_root(&self) -> PathBuf {
        match &self.dest_dir {
            Some(dir) => self.output_path.join(dir),
            None => self.output_path.clone(),
        }
    }

    fn destination_of(&self, relative_path: &str) -> String {
        let mapped = match &self.options.get_destination_path {
            Some(f) => f(relative_path),
            None => relative_path.to_string(),
        };
        match &self.dest_dir {
            Some(dir) => format!("{dir}/{}", mapped.trim_start_matches('/')),
            None => mapped,
        }
    }

    /// Link the whole source root into place
    async fn build_passthrough(&mut self, src_root: &Path, src_exists: bool) -> Result<BuildOutcome> {
        let target = self.dest_root();

        // Copies do not track their source, so they are refreshed every build
        let up_to_date = match self.root_link {
            Some(Linked::Symlinked) => src_exists,
            Some(Linked::Copied) => false,
            None => !src_exists && target.is_dir(),
        };
        if up_to_date {
            debug!("{}: passthrough link unchanged", self.label);
            return Ok(BuildOutcome::default());
        }

        remove_path(&target).at(&target)?;
        if src_exists {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.at(parent)?;
            }
            let linked = link_or_copy(src_root, &target, self.options.link_mode).at(&target)?;
            info!("{}: linked {} -> {}", self.label, target.display(), src_root.display());
            self.root_link = Some(linked);
        } else {
            tokio::fs::create_dir_all(&target).await.at(&target)?;
            self.root_link = None;
        }
        Ok(BuildOutcome::new(1))
    }
}

#[async_trait]
impl Node for Funnel {
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
        let src_root = self.src_root();
        let src_exists = tokio::fs::metadata(&src_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if !src_exists && !self.options.allow_empty {
            return Err(Error::MissingInput {
                node: self.label.clone(),
                path: src_root,
            });
        }

        if self.options.is_passthrough() {
            return self.build_passthrough(&src_root, src_exists).await;
        }

        let source_tree = if src_exists {
            Tree::from_dir(&src_root)?
        } else {
            Tree::new()
        };

        let mut entries: Vec<Entry> = Vec::new();
        let mut sources: AHashMap<String, String> = AHashMap::new();
        for entry in source_tree.files() {
            let relative_path = entry.relative_path.as_str();
            if !self.options.selects(relative_path) {
                continue;
            }
            let destination = self.destination_of(relative_path);
            if let Some(previous) = sources.insert(destination.clone(), relative_path.to_string()) {
                return Err(Error::config(
                    &self.label,
                    format!("{previous} and {relative_path} both map to {destination}"),
                ));
            }
            entries.push(entry.with_path(destination));
        }

        if entries.is_empty() && !self.options.allow_empty {
            return Err(Error::NothingMatched {
                node: self.label.clone(),
                what: format!("{} in {}", self.options.describe_selection(), src_root.display()),
            });
        }

        let next = Tree::from_entries(entries);
        let patch = self.current.calculate_patch(&next);
        if patch.is_empty() {
            debug!("{}: no changes", self.label);
            return Ok(BuildOutcome::default());
        }

        let applied = apply_patch(&self.output_path, &patch, self.options.link_mode, |change| {
            let destination = change.relative_path();
            match sources.get(destination) {
                Some(source) => src_root.join(source),
                None => src_root.join(destination),
            }
        });
        if let Err(e) = applied {
            warn!("{}: build failed, output will be rebuilt", self.label);
            self.current = Tree::new();
            clear_dir(&self.output_path).at(&self.output_path)?;
            return Err(e);
        }

        info!("{}: {}", self.label, patch.summary());
        self.current = next;
        Ok(BuildOutcome::new(patch.len()))
    }
}

impl fmt::Debug for Funnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Funnel")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("input", &self.input)
            .field("output_path", &self.output_path)
            .field("options", &self.options)
            .finish()
    }
}
