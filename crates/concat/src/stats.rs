//! Bundle-size stats sidecar

use loam_core::store::atomic_write;
use loam_core::{BuildContext, IoResultExt, NodeId, Result, StatsRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar location: `{stats_dir}/{node_id}-{basename(output_file)}.json`
pub fn sidecar_path(stats_dir: &Path, node_id: NodeId, output_file: &str) -> PathBuf {
    let basename = Path::new(output_file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| output_file.to_string());
    stats_dir.join(format!("{node_id}-{basename}.json"))
}

/// Record sizes in the context and, when enabled, on disk
pub fn emit(
    ctx: &BuildContext,
    node_id: NodeId,
    output_file: &str,
    sizes: &BTreeMap<String, u64>,
) -> Result<()> {
    if !ctx.settings().concat_stats {
        return Ok(());
    }

    let record = StatsRecord {
        node_id,
        output_file: output_file.to_string(),
        sizes: sizes.clone(),
    };
    let path = sidecar_path(&ctx.settings().stats_dir(), node_id, output_file);
    let json = serde_json::to_vec_pretty(&record)?;
    atomic_write(&path, &json).at(&path)?;
    debug!("wrote concat stats {}", path.display());

    ctx.record_stats(record);
    Ok(())
}
