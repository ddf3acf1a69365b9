//! Build the pipeline once and copy the result out

use anyhow::{bail, Context, Result};
use loam_core::link::{copy_dir_all, remove_path};
use loam_core::BuildContext;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Instant;

pub async fn run(config_path: &Path, out: &Path, overwrite: bool) -> Result<()> {
    if out.exists() && !overwrite {
        bail!(
            "Output directory {} already exists (use --overwrite to replace it)",
            out.display()
        );
    }

    let (config, base_dir) = super::load_config(config_path)?;

    let work_dir = tempfile::Builder::new()
        .prefix("loam-build-")
        .tempdir()
        .context("Failed to create work directory")?;
    let ctx = BuildContext::new(work_dir.path(), config.settings.clone());
    let mut builder = config.instantiate(&base_dir, ctx.clone())?;

    println!("{}", "Building pipeline".bold());
    let start = Instant::now();
    let reports = builder.build().await?;

    for report in &reports {
        let changes = if report.outcome.is_noop() {
            "unchanged".dimmed().to_string()
        } else {
            format!("{} changes", report.outcome.changes).green().to_string()
        };
        println!(
            "  {:<32} {:>14}  {}",
            report.label.cyan(),
            changes,
            format!("{:.1?}", report.elapsed).dimmed()
        );
    }

    let Some(terminal) = builder.output_path() else {
        bail!("Pipeline has no nodes");
    };
    remove_path(out).with_context(|| format!("Failed to clear {}", out.display()))?;
    copy_dir_all(terminal, out)
        .with_context(|| format!("Failed to copy output to {}", out.display()))?;

    for record in ctx.stats() {
        let total: u64 = record.sizes.values().sum();
        println!(
            "  {} {} ({} files, {} bytes)",
            "stats".dimmed(),
            record.output_file,
            record.sizes.len(),
            total
        );
    }

    println!();
    println!(
        "{} Built {} in {:.2?}",
        "✓".green(),
        out.display().to_string().cyan(),
        start.elapsed()
    );
    Ok(())
}
