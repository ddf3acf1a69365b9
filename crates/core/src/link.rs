//! Linking files from an input tree into an output tree
//!
//! Nodes that pass content through unchanged prefer a symlink and fall back
//! to a copy when the platform or filesystem refuses one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// How unchanged files reach the output tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Symlink, copying when symlinks are unsupported
    #[cfg_attr(unix, default)]
    Symlink,
    /// Always copy
    #[cfg_attr(not(unix), default)]
    Copy,
}

/// What [`link_or_copy`] ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linked {
    Symlinked,
    Copied,
}

/// Make `target` show the content of `source` (file or directory)
pub fn link_or_copy(source: &Path, target: &Path, mode: LinkMode) -> io::Result<Linked> {
    if mode == LinkMode::Symlink {
        let source = absolute(source)?;
        match symlink(&source, target) {
            Ok(()) => return Ok(Linked::Symlinked),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
            Err(e) => {
                warn!(
                    "symlink {} -> {} failed ({}), copying instead",
                    target.display(),
                    source.display(),
                    e
                );
            }
        }
    }

    if fs::metadata(source)?.is_dir() {
        copy_dir_all(source, target)?;
    } else {
        fs::copy(source, target)?;
    }
    Ok(Linked::Copied)
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    }
}

#[cfg(not(any(unix, windows)))]
fn symlink(_source: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unsupported"))
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Recursively copy a directory, following symlinks in the source
pub fn copy_dir_all(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    for item in WalkDir::new(source).follow_links(true).min_depth(1) {
        let item = item.map_err(io::Error::from)?;
        let Ok(rel) = item.path().strip_prefix(source) else {
            continue;
        };
        let dest = target.join(rel);
        if item.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(item.path(), &dest)?;
        }
    }
    Ok(())
}

/// Remove a file, symlink or directory tree; absent paths are fine
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Empty a directory, creating it when absent
pub fn clear_dir(path: &Path) -> io::Result<()> {
    remove_path(path)?;
    fs::create_dir_all(path)
}
