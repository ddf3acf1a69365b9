//! `loam.toml` pipeline configuration
//!
//! ```toml
//! [settings]
//! jobs = 4
//!
//! [[node]]
//! name = "scripts"
//! kind = "funnel"
//! input = "app"
//! include = ["**/*.js"]
//!
//! [[node]]
//! name = "versioned"
//! kind = "filter"
//! input = "scripts"
//! extensions = ["js"]
//! transform = { type = "replace", replacements = { "__VERSION__" = "1.0.0" } }
//!
//! [[node]]
//! name = "bundle"
//! kind = "concat"
//! input = "versioned"
//! output_file = "app.js"
//! input_files = ["**/*.js"]
//! ```
//!
//! `input` names an earlier node or, failing that, a directory relative to
//! the config file. Settings from the file are overridden by the environment.

use crate::builder::Builder;
use crate::transforms::{Banner, Replace};
use anyhow::Context;
use concat::{Concat, ConcatOptions, MapCommentType, SourceMapConfig};
use filter::{ContentTransformer, FilterOptions, PersistentFilter};
use funnel::{Funnel, FunnelOptions, Matcher};
use loam_core::{BuildContext, LinkMode, Node, Settings};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default config file name
pub const CONFIG_FILE: &str = "loam.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid pipeline: {0}")]
    Invalid(String),
}

/// A whole pipeline file
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
}

/// One `[[node]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub input: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Funnel(FunnelConfig),
    Filter(FilterConfig),
    Concat(ConcatConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    pub src_dir: Option<String>,
    pub dest_dir: Option<String>,
    /// Include globs
    pub include: Vec<String>,
    pub include_regex: Vec<String>,
    /// Exclude globs
    pub exclude: Vec<String>,
    pub exclude_regex: Vec<String>,
    pub files: Option<Vec<String>>,
    pub allow_empty: bool,
    /// Copy instead of symlinking
    pub copy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub target_extension: Option<String>,
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_async")]
    pub async_mode: bool,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub copy: bool,
    pub transform: TransformConfig,
}

fn default_async() -> bool {
    true
}

/// Built-in transformers
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransformConfig {
    Replace { replacements: BTreeMap<String, String> },
    Banner { text: String },
}

impl TransformConfig {
    fn transformer(&self) -> Arc<dyn ContentTransformer> {
        match self {
            TransformConfig::Replace { replacements } => Arc::new(Replace::new(replacements.clone())),
            TransformConfig::Banner { text } => Arc::new(Banner::new(text.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapComment {
    #[default]
    Line,
    Block,
}

impl From<MapComment> for MapCommentType {
    fn from(comment: MapComment) -> Self {
        match comment {
            MapComment::Line => MapCommentType::Line,
            MapComment::Block => MapCommentType::Block,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcatConfig {
    pub output_file: String,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub header_files: Vec<String>,
    #[serde(default)]
    pub footer_files: Vec<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub allow_none: bool,
    #[serde(default)]
    pub source_map: bool,
    #[serde(default)]
    pub map_comment: MapComment,
    #[serde(default)]
    pub content_limit: Option<usize>,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Funnel(_) => "funnel",
            NodeKind::Filter(_) => "filter",
            NodeKind::Concat(_) => "concat",
        }
    }
}

fn link_mode(copy: bool) -> LinkMode {
    if copy {
        LinkMode::Copy
    } else {
        LinkMode::default()
    }
}

impl PipelineConfig {
    /// Read a config file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading pipeline from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.settings.apply_env(|key| std::env::var(key).ok());

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        Ok(config)
    }

    /// Parse and validate without touching the environment
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if self.settings.cache_root.is_relative() {
            self.settings.cache_root = base_dir.join(&self.settings.cache_root);
        }
        if let Some(stats) = &self.settings.concat_stats_path {
            if stats.is_relative() {
                self.settings.concat_stats_path = Some(base_dir.join(stats));
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("no [[node]] entries".to_string()));
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("node #{} has an empty name", index + 1)));
            }
            if seen.insert(node.name.as_str(), index).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate node name {:?}", node.name)));
            }
            if node.input == node.name {
                return Err(ConfigError::Invalid(format!("node {:?} reads its own output", node.name)));
            }
        }

        // Inputs may only point backwards
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(&target) = seen.get(node.input.as_str()) {
                if target > index {
                    return Err(ConfigError::Invalid(format!(
                        "node {:?} reads {:?}, which is defined after it",
                        node.name, node.input
                    )));
                }
            }
        }
        Ok(())
    }

    /// Construct every node, in file order
    pub fn instantiate(&self, base_dir: &Path, ctx: Arc<BuildContext>) -> anyhow::Result<Builder> {
        let mut builder = Builder::new(ctx.clone());
        let mut outputs: HashMap<&str, PathBuf> = HashMap::new();

        for node in &self.nodes {
            let input = match outputs.get(node.input.as_str()) {
                Some(path) => path.clone(),
                None => base_dir.join(&node.input),
            };

            let output = match &node.kind {
                NodeKind::Funnel(config) => {
                    let funnel = Funnel::new(ctx.clone(), input, funnel_options(&node.name, config)?)
                        .with_context(|| format!("Failed to create node {:?}", node.name))?;
                    let output = funnel.output_path().to_path_buf();
                    builder.add(funnel);
                    output
                }
                NodeKind::Filter(config) => {
                    let filter = PersistentFilter::new(
                        ctx.clone(),
                        input,
                        config.transform.transformer(),
                        filter_options(&node.name, config),
                    )
                    .with_context(|| format!("Failed to create node {:?}", node.name))?;
                    let output = filter.output_path().to_path_buf();
                    builder.add(filter);
                    output
                }
                NodeKind::Concat(config) => {
                    let concat = Concat::new(ctx.clone(), input, concat_options(&node.name, config))
                        .with_context(|| format!("Failed to create node {:?}", node.name))?;
                    let output = concat.output_path().to_path_buf();
                    builder.add(concat);
                    output
                }
            };
            debug!("{} node {:?} -> {}", node.kind.as_str(), node.name, output.display());
            outputs.insert(node.name.as_str(), output);
        }

        Ok(builder)
    }
}

fn funnel_options(name: &str, config: &FunnelConfig) -> anyhow::Result<FunnelOptions> {
    let mut options = FunnelOptions::new()
        .allow_empty(config.allow_empty)
        .annotation(name)
        .link_mode(link_mode(config.copy));

    if let Some(dir) = &config.src_dir {
        options = options.src_dir(dir.as_str());
    }
    if let Some(dir) = &config.dest_dir {
        options = options.dest_dir(dir.as_str());
    }
    if let Some(files) = &config.files {
        options = options.files(files.iter().cloned());
    }
    for pattern in &config.include {
        let matcher = Matcher::glob(pattern)
            .with_context(|| format!("node {name:?}: bad include glob {pattern:?}"))?;
        options = options.include(matcher);
    }
    for pattern in &config.include_regex {
        let matcher = Matcher::regex(pattern)
            .with_context(|| format!("node {name:?}: bad include regex {pattern:?}"))?;
        options = options.include(matcher);
    }
    for pattern in &config.exclude {
        let matcher = Matcher::glob(pattern)
            .with_context(|| format!("node {name:?}: bad exclude glob {pattern:?}"))?;
        options = options.exclude(matcher);
    }
    for pattern in &config.exclude_regex {
        let matcher = Matcher::regex(pattern)
            .with_context(|| format!("node {name:?}: bad exclude regex {pattern:?}"))?;
        options = options.exclude(matcher);
    }
    Ok(options)
}

fn filter_options(name: &str, config: &FilterConfig) -> FilterOptions {
    let mut options = FilterOptions::new()
        .persist(config.persist)
        .async_mode(config.async_mode)
        .annotation(name)
        .link_mode(link_mode(config.copy));

    if let Some(extensions) = &config.extensions {
        options = options.extensions(extensions.iter().cloned());
    }
    if let Some(ext) = &config.target_extension {
        options = options.target_extension(ext.as_str());
    }
    if let Some(n) = config.concurrency {
        options = options.concurrency(n);
    }
    options
}

fn concat_options(name: &str, config: &ConcatConfig) -> ConcatOptions {
    let mut options = ConcatOptions::new(config.output_file.as_str())
        .input_files(config.input_files.iter().cloned())
        .header_files(config.header_files.iter().cloned())
        .footer_files(config.footer_files.iter().cloned())
        .allow_none(config.allow_none)
        .source_maps(SourceMapConfig {
            enabled: config.source_map,
            map_comment_type: config.map_comment.into(),
            ..SourceMapConfig::default()
        })
        .annotation(name);

    if let Some(header) = &config.header {
        options = options.header(header.as_str());
    }
    if let Some(footer) = &config.footer {
        options = options.footer(footer.as_str());
    }
    if let Some(separator) = &config.separator {
        options = options.separator(separator.as_str());
    }
    if let Some(limit) = config.content_limit {
        options = options.content_limit(limit);
    }
    options
}
