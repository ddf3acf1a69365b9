//! Validate a pipeline file without building it

use anyhow::{Context, Result};
use loam_core::BuildContext;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let (config, base_dir) = super::load_config(config_path)?;

    // Constructors run every option check; nothing is read from the inputs
    let work_dir = tempfile::tempdir().context("Failed to create work directory")?;
    let ctx = BuildContext::new(work_dir.path(), config.settings.clone());
    let builder = config.instantiate(&base_dir, ctx)?;

    println!("{}", "Pipeline".bold());
    for (node, label) in config.nodes.iter().zip(builder.labels()) {
        println!(
            "  {:<8} {:<32} {} {}",
            node.kind.as_str().dimmed(),
            label.cyan(),
            "<-".dimmed(),
            node.input
        );
    }

    println!();
    println!("Jobs:          {}", config.settings.jobs);
    println!("Cache root:    {}", config.settings.cache_root.display());
    if !config.settings.persistence_allowed {
        println!("               {}", "(persistent cache disabled in CI)".dimmed());
    }
    println!();
    println!("{} {} nodes OK", "✓".green(), builder.len());
    Ok(())
}
