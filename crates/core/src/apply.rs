//! Mirroring a patch onto an output directory

use crate::error::{IoResultExt, Result};
use crate::link::{link_or_copy, remove_path, LinkMode};
use crate::tree::{Change, Operation, Patch};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Apply `patch` under `output_root`
///
/// `source_of` names the input file whose content a create/change should
/// expose at the change's path. Every operation tolerates the state a
/// half-applied earlier attempt leaves behind.
pub fn apply_patch<F>(output_root: &Path, patch: &Patch, mode: LinkMode, mut source_of: F) -> Result<()>
where
    F: FnMut(&Change) -> PathBuf,
{
    for change in patch {
        let target = output_root.join(change.relative_path().trim_end_matches('/'));
        debug!("{} {}", change.operation, change.relative_path());

        match change.operation {
            Operation::Mkdir => fs::create_dir_all(&target).at(&target)?,
            Operation::Rmdir => match fs::remove_dir(&target) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(crate::Error::io(target, e)),
                _ => {}
            },
            Operation::Unlink => remove_path(&target).at(&target)?,
            Operation::Create | Operation::Change => {
                let source = source_of(change);
                // A retried build may find a create target already present
                remove_path(&target).at(&target)?;
                link_with_retry(&source, &target, mode).at(&target)?;
            }
        }
    }
    Ok(())
}

fn link_with_retry(source: &Path, target: &Path, mode: LinkMode) -> io::Result<()> {
    match link_or_copy(source, target, mode) {
        Err(e) if e.kind() == io::ErrorKind::NotFound && !target.parent().is_some_and(Path::exists) => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            link_or_copy(source, target, mode).map(|_| ())
        }
        other => other.map(|_| ()),
    }
}
