//! Concat - merge many input files into one output file
//!
//! Section order is fixed: header literal, header files (configured
//! order), body files (sorted by path), footer files (configured order),
//! footer literal, joined by the separator.
//!
//! Two strategies:
//! - [`SimpleConcat`] follows the input patch and only re-reads changed files
//! - [`SourceMapConcat`] re-reads everything each build and emits a source
//!   map, merging the maps its inputs point at; used when source maps are
//!   enabled for the output's extension

pub mod simple;
pub mod source_map;
pub mod stats;

pub use simple::SimpleConcat;
pub use source_map::{MapCommentType, MapError, SourceMap, SourceMapConcat};

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use loam_core::link::remove_path;
use loam_core::tree::has_glob_chars;
use loam_core::{
    BuildContext, BuildOutcome, Error, IoResultExt, Node, NodeId, Operation, Result, Tree,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content above this many bytes is re-read instead of kept in memory
pub const DEFAULT_CONTENT_LIMIT: usize = 10_000;

/// Source map settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapConfig {
    pub enabled: bool,
    /// Output extensions (without the dot) that get a map
    pub extensions: Vec<String>,
    pub map_comment_type: MapCommentType,
}

impl Default for SourceMapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            extensions: vec!["js".to_string()],
            map_comment_type: MapCommentType::Line,
        }
    }
}

/// Concat configuration
#[derive(Debug, Clone)]
pub struct ConcatOptions {
    /// Output path relative to the node's output directory
    pub output_file: String,
    /// Globs selecting body files
    pub input_files: Vec<String>,
    pub header_files: Vec<String>,
    pub footer_files: Vec<String>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub separator: String,
    pub allow_none: bool,
    pub source_map_config: SourceMapConfig,
    pub content_limit: usize,
    pub annotation: Option<String>,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self {
            output_file: String::new(),
            input_files: Vec::new(),
            header_files: Vec::new(),
            footer_files: Vec::new(),
            header: None,
            footer: None,
            separator: "\n".to_string(),
            allow_none: false,
            source_map_config: SourceMapConfig::default(),
            content_limit: DEFAULT_CONTENT_LIMIT,
            annotation: None,
        }
    }
}

impl ConcatOptions {
    pub fn new(output_file: impl Into<String>) -> Self {
        Self {
            output_file: output_file.into(),
            ..Self::default()
        }
    }

    pub fn input_files<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_files = globs.into_iter().map(Into::into).collect();
        self
    }

    pub fn header_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn footer_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.footer_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn allow_none(mut self, allow: bool) -> Self {
        self.allow_none = allow;
        self
    }

    pub fn source_maps(mut self, config: SourceMapConfig) -> Self {
        self.source_map_config = config;
        self
    }

    pub fn content_limit(mut self, limit: usize) -> Self {
        self.content_limit = limit;
        self
    }

    pub fn annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

fn simple_concat(options: &ConcatOptions) -> SimpleConcat {
    SimpleConcat::new(
        options.header.clone(),
        options.footer.clone(),
        options.separator.clone(),
        options.header_files.clone(),
        options.footer_files.clone(),
        options.content_limit,
    )
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

enum Strategy {
    Simple(SimpleConcat),
    SourceMap,
}

/// The Concat node
pub struct Concat {
    ctx: Arc<BuildContext>,
    id: NodeId,
    label: String,
    input: PathBuf,
    output_path: PathBuf,
    options: ConcatOptions,
    patterns: Vec<Pattern>,
    strategy: Strategy,
    /// Snapshot of the tracked input files
    current: Tree,
}

impl Concat {
    pub fn new(ctx: Arc<BuildContext>, input: impl Into<PathBuf>, options: ConcatOptions) -> Result<Self> {
        let label = match &options.annotation {
            Some(a) => format!("Concat ({a})"),
            None => "Concat".to_string(),
        };

        let output_file = options.output_file.trim_start_matches('/').to_string();
        if output_file.is_empty() || output_file.ends_with('/') {
            return Err(Error::config(&label, "output_file is required"));
        }
        if output_file.split('/').any(|c| c == "..") {
            return Err(Error::config(&label, "output_file must stay inside the output directory"));
        }
        for (field, files) in [("header_files", &options.header_files), ("footer_files", &options.footer_files)] {
            if let Some(bad) = files.iter().find(|f| has_glob_chars(f)) {
                return Err(Error::config(
                    &label,
                    format!("{field} cannot contain a glob, got {bad:?}"),
                ));
            }
        }
        let patterns = options
            .input_files
            .iter()
            .map(|g| {
                Pattern::new(g).map_err(|e| Error::config(&label, format!("bad input_files glob {g:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let uses_source_map = options.source_map_config.enabled
            && Path::new(&output_file)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| options.source_map_config.extensions.iter().any(|e| e == ext));
        let strategy = if uses_source_map {
            Strategy::SourceMap
        } else {
            Strategy::Simple(simple_concat(&options))
        };

        let slot = ctx.allocate(&label)?;
        let options = ConcatOptions {
            output_file,
            ..options
        };
        Ok(Self {
            ctx,
            id: slot.id,
            label,
            input: input.into(),
            output_path: slot.output_path,
            options,
            patterns,
            strategy,
            current: Tree::new(),
        })
    }

    /// Whether the node regenerates a source map each build
    pub fn uses_source_map(&self) -> bool {
        matches!(self.strategy, Strategy::SourceMap)
    }

    pub fn output_file_path(&self) -> PathBuf {
        self.output_path.join(&self.options.output_file)
    }

    /// Map file: `.js` stripped from the output name, then `.map`
    pub fn map_file_path(&self) -> PathBuf {
        let name = &self.options.output_file;
        let stem = name.strip_suffix(".js").unwrap_or(name);
        self.output_path.join(format!("{stem}.map"))
    }

    fn is_fixed(&self, relative_path: &str) -> bool {
        self.options.header_files.iter().any(|f| f == relative_path)
            || self.options.footer_files.iter().any(|f| f == relative_path)
    }

    fn is_body(&self, relative_path: &str) -> bool {
        !self.is_fixed(relative_path)
            && self.patterns.iter().any(|p| p.matches_with(relative_path, GLOB_OPTIONS))
    }

    /// Input files this node reads, as a snapshot
    fn tracked(&self, input: &Tree) -> Result<Tree> {
        for name in self.options.header_files.iter().chain(&self.options.footer_files) {
            if input.get(name).is_none() {
                return Err(Error::MissingInput {
                    node: self.label.clone(),
                    path: self.input.join(name),
                });
            }
        }
        Ok(Tree::from_entries(
            input
                .files()
                .filter(|e| self.is_fixed(&e.relative_path) || self.is_body(&e.relative_path))
                .cloned(),
        ))
    }

    fn nothing_matched(&self) -> Error {
        Error::NothingMatched {
            node: self.label.clone(),
            what: format!("[{}] in {}", self.options.input_files.join(", "), self.input.display()),
        }
    }

    /// Write `path` unless it already holds `content`
    async fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
        if let Ok(existing) = tokio::fs::read(path).await {
            if existing == content {
                return Ok(false);
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.at(parent)?;
        }
        tokio::fs::write(path, content).await.at(path)?;
        Ok(true)
    }

    async fn build_simple(&mut self, tracked: &Tree) -> Result<BuildOutcome> {
        let patch = self.current.calculate_patch(tracked);
        let output_file = self.output_file_path();
        if patch.is_empty() && output_file.exists() {
            debug!("{}: no changes", self.label);
            return Ok(BuildOutcome::default());
        }

        let Strategy::Simple(concat) = &mut self.strategy else {
            return Ok(BuildOutcome::default());
        };
        for change in &patch {
            let relative_path = change.relative_path();
            match change.operation {
                Operation::Create => concat.add_file(relative_path, self.input.join(relative_path)),
                Operation::Change => concat.update_file(relative_path, self.input.join(relative_path)),
                Operation::Unlink => concat.remove_file(relative_path),
                Operation::Mkdir | Operation::Rmdir => {}
            }
        }

        let result = concat.result().at(&self.input)?;
        let sizes = concat.sizes().clone();
        let content = match result {
            Some(content) => content,
            None if self.options.allow_none => String::new(),
            None => return Err(self.nothing_matched()),
        };

        let wrote = Self::write_if_changed(&output_file, content.as_bytes()).await?;
        stats::emit(&self.ctx, self.id, &self.options.output_file, &sizes)?;
        info!(
            "{}: {} -> {} ({})",
            self.label,
            patch.summary(),
            self.options.output_file,
            if wrote { "written" } else { "unchanged" }
        );
        Ok(BuildOutcome::new(patch.len()))
    }

    async fn build_source_map(&mut self, tracked: &Tree) -> Result<BuildOutcome> {
        let patch = self.current.calculate_patch(tracked);
        if patch.is_empty() && self.output_file_path().exists() {
            debug!("{}: no changes", self.label);
            return Ok(BuildOutcome::default());
        }

        let mut order: Vec<&str> = self.options.header_files.iter().map(String::as_str).collect();
        order.extend(
            tracked
                .files()
                .map(|e| e.relative_path.as_str())
                .filter(|p| !self.is_fixed(p)),
        );
        order.extend(self.options.footer_files.iter().map(String::as_str));

        let output_file = self.output_file_path();
        if order.is_empty() {
            if !self.options.allow_none {
                return Err(self.nothing_matched());
            }
            Self::write_if_changed(&output_file, b"").await?;
            return Ok(BuildOutcome::new(patch.len()));
        }

        let file_name = Path::new(&self.options.output_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut concat = SourceMapConcat::new(file_name).with_base_dir(&self.input);
        let mut first = true;
        if let Some(header) = &self.options.header {
            concat.add_space(header);
            first = false;
        }
        for name in order {
            if !first {
                concat.add_space(&self.options.separator);
            }
            first = false;
            let path = self.input.join(name);
            let bytes = tokio::fs::read(&path).await.at(&path)?;
            concat.add_file_source(name, &String::from_utf8_lossy(&bytes));
        }
        if let Some(footer) = &self.options.footer {
            concat.add_space(&self.options.separator);
            concat.add_space(footer);
        }

        let sizes = concat.sizes().clone();
        let map_file = self.map_file_path();
        let map_url = map_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (code, map) = concat.end(&map_url, self.options.source_map_config.map_comment_type);

        Self::write_if_changed(&output_file, code.as_bytes()).await?;
        Self::write_if_changed(&map_file, &serde_json::to_vec(&map)?).await?;
        stats::emit(&self.ctx, self.id, &self.options.output_file, &sizes)?;
        info!("{}: rebuilt {} with source map", self.label, self.options.output_file);
        Ok(BuildOutcome::new(patch.len()))
    }
}

#[async_trait]
impl Node for Concat {
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
        let input = Tree::from_dir(&self.input)?;
        let tracked = self.tracked(&input)?;

        let built = match self.strategy {
            Strategy::Simple(_) => self.build_simple(&tracked).await,
            Strategy::SourceMap => self.build_source_map(&tracked).await,
        };
        match built {
            Ok(outcome) => {
                self.current = tracked;
                Ok(outcome)
            }
            Err(e) => {
                // The incremental state may hold part of the patch
                warn!("{}: build failed, output will be rebuilt", self.label);
                if let Strategy::Simple(concat) = &mut self.strategy {
                    *concat = simple_concat(&self.options);
                }
                self.current = Tree::new();
                let output_file = self.output_file_path();
                remove_path(&output_file).at(&output_file)?;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Concat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Concat")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("input", &self.input)
            .field("options", &self.options)
            .field("source_map", &self.uses_source_map())
            .finish()
    }
}
