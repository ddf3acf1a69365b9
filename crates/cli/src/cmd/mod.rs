//! CLI command implementations

pub mod build;
pub mod check;

use anyhow::{Context, Result};
use cli_lib::PipelineConfig;
use std::path::{Path, PathBuf};

/// Load a pipeline file and return it with the directory it lives in
pub(crate) fn load_config(path: &Path) -> Result<(PipelineConfig, PathBuf)> {
    let config = PipelineConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((config, base_dir))
}
