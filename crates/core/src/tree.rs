//! Tree snapshots and patch computation
//!
//! A [`Tree`] is the complete listing of a directory at one point in time.
//! Entries are kept sorted by relative path; directories carry a trailing
//! `/`, so a directory always sorts before its descendants.
//!
//! [`Tree::calculate_patch`] produces the ordered [`Patch`] that turns one
//! snapshot into another: all removals first (children before their
//! parent), then additions and changes (parent before children).

use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Type of tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (or a symlink to one)
    File,
    /// Directory (or a symlink to one)
    Directory,
}

/// One file or directory inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// POSIX relative path; directories end with `/`
    pub relative_path: String,
    /// Kind of entry
    pub kind: EntryKind,
    /// Permission bits, compared for change detection only
    pub mode: u32,
    /// Size in bytes
    pub size: u64,
    /// Modification time, compared for change detection only
    pub mtime: Option<SystemTime>,
}

impl Entry {
    /// Create a file entry
    pub fn file(relative_path: impl Into<String>, size: u64, mtime: Option<SystemTime>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: EntryKind::File,
            mode: 0o100644,
            size,
            mtime,
        }
    }

    /// Create a directory entry; a trailing `/` is added when missing
    pub fn directory(relative_path: impl Into<String>) -> Self {
        let mut relative_path = relative_path.into();
        if !relative_path.ends_with('/') {
            relative_path.push('/');
        }
        Self {
            relative_path,
            kind: EntryKind::Directory,
            mode: 0o040755,
            size: 0,
            mtime: None,
        }
    }

    /// Capture an entry from filesystem metadata
    pub fn from_metadata(relative_path: impl Into<String>, metadata: &Metadata) -> Self {
        let mut relative_path = relative_path.into();
        let kind = if metadata.is_dir() {
            if !relative_path.ends_with('/') {
                relative_path.push('/');
            }
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        Self {
            relative_path,
            kind,
            mode: mode_of(metadata),
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            mtime: metadata.modified().ok(),
        }
    }

    /// Whether this entry is a directory
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Same metadata under another path (used when remapping destinations)
    pub fn with_path(&self, relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            ..self.clone()
        }
    }

    /// Change detection: directories never "change", files compare
    /// size, mode and mtime.
    pub fn is_equal(&self, other: &Entry) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.is_directory() {
            return true;
        }
        self.size == other.size && self.mode == other.mode && self.mtime == other.mtime
    }
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o040755
    } else if metadata.permissions().readonly() {
        0o100444
    } else {
        0o100644
    }
}

/// Patch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Mkdir,
    Rmdir,
    Create,
    Change,
    Unlink,
}

impl Operation {
    /// Whether the operation only touches directory structure
    pub fn is_structural(&self) -> bool {
        !matches!(self, Operation::Create | Operation::Change)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Mkdir => "mkdir",
            Operation::Rmdir => "rmdir",
            Operation::Create => "create",
            Operation::Change => "change",
            Operation::Unlink => "unlink",
        };
        f.write_str(name)
    }
}

/// One step of a patch
///
/// `entry` is the new entry for mkdir/create/change and the old one for
/// rmdir/unlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub operation: Operation,
    pub entry: Entry,
}

impl Change {
    /// Relative path the operation applies to
    pub fn relative_path(&self) -> &str {
        &self.entry.relative_path
    }
}

/// Ordered list of operations turning one snapshot into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    changes: Vec<Change>,
}

impl Patch {
    /// Number of operations
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if there are any changes
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterate operations in application order
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Count the operations of one kind
    pub fn count(&self, operation: Operation) -> usize {
        self.changes.iter().filter(|c| c.operation == operation).count()
    }

    /// One-line summary for logs, e.g. `create=2 unlink=1`
    pub fn summary(&self) -> String {
        [
            Operation::Mkdir,
            Operation::Create,
            Operation::Change,
            Operation::Unlink,
            Operation::Rmdir,
        ]
        .iter()
        .filter_map(|op| match self.count(*op) {
            0 => None,
            n => Some(format!("{op}={n}")),
        })
        .collect::<Vec<_>>()
        .join(" ")
    }
}

impl IntoIterator for Patch {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// A tree represents the complete state of a directory at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Sorted by relative path, no duplicates
    entries: Vec<Entry>,
}

impl Tree {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from arbitrary entries
    ///
    /// Entries are sorted, duplicates keep the last occurrence, and every
    /// missing parent directory is added.
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut by_path: std::collections::BTreeMap<String, Entry> = Default::default();

        for entry in entries {
            let path = entry.relative_path.trim_end_matches('/');
            let mut end = 0;
            while let Some(pos) = path[end..].find('/') {
                end += pos + 1;
                let parent = &path[..end];
                by_path
                    .entry(parent.to_string())
                    .or_insert_with(|| Entry::directory(parent));
            }
            by_path.insert(entry.relative_path.clone(), entry);
        }

        Self {
            entries: by_path.into_values().collect(),
        }
    }

    /// Walk a directory on disk, following symlinks
    pub fn from_dir(root: &Path) -> Result<Self> {
        std::fs::metadata(root).at(root)?;

        let mut entries = Vec::new();
        for item in WalkDir::new(root).follow_links(true).min_depth(1) {
            let item = item?;
            let Ok(rel) = item.path().strip_prefix(root) else {
                continue;
            };
            let metadata = item.metadata()?;
            entries.push(Entry::from_metadata(to_posix(rel), &metadata));
        }

        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(Self { entries })
    }

    /// Entries in sorted order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// File entries only
    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_directory())
    }

    /// Look up an entry by relative path
    pub fn get(&self, relative_path: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Get the number of entries in the tree
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tree is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute the patch that turns `self` into `next`
    pub fn calculate_patch(&self, next: &Tree) -> Patch {
        let mut removals = Vec::new();
        let mut additions = Vec::new();

        let (old, new) = (&self.entries, &next.entries);
        let (mut i, mut j) = (0, 0);

        while i < old.len() || j < new.len() {
            let ordering = match (old.get(i), new.get(j)) {
                (Some(a), Some(b)) => a.relative_path.cmp(&b.relative_path),
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };

            match ordering {
                Ordering::Less => {
                    removals.push(removal(&old[i]));
                    i += 1;
                }
                Ordering::Greater => {
                    additions.push(addition(&new[j]));
                    j += 1;
                }
                Ordering::Equal => {
                    if !old[i].is_equal(&new[j]) {
                        additions.push(Change {
                            operation: Operation::Change,
                            entry: new[j].clone(),
                        });
                    }
                    i += 1;
                    j += 1;
                }
            }
        }

        removals.reverse();
        removals.extend(additions);
        Patch { changes: removals }
    }
}

fn removal(entry: &Entry) -> Change {
    let operation = if entry.is_directory() {
        Operation::Rmdir
    } else {
        Operation::Unlink
    };
    Change {
        operation,
        entry: entry.clone(),
    }
}

fn addition(entry: &Entry) -> Change {
    let operation = if entry.is_directory() {
        Operation::Mkdir
    } else {
        Operation::Create
    };
    Change {
        operation,
        entry: entry.clone(),
    }
}

/// Whether a path contains glob metacharacters
pub fn has_glob_chars(path: &str) -> bool {
    path.contains(['*', '?', '[', ']', '{', '}', '!'])
}

/// Render a relative filesystem path with `/` separators
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> Option<SystemTime> {
        Some(UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn ops(patch: &Patch) -> Vec<(Operation, String)> {
        patch
            .iter()
            .map(|c| (c.operation, c.relative_path().to_string()))
            .collect()
    }

    #[test]
    fn test_from_entries_sorts_and_expands_parents() {
        let tree = Tree::from_entries(vec![
            Entry::file("b/c/d.txt", 1, at(1)),
            Entry::file("a.txt", 1, at(1)),
        ]);

        let paths: Vec<_> = tree.entries().iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b/", "b/c/", "b/c/d.txt"]);
    }

    #[test]
    fn test_directory_precedes_siblings_with_punctuation() {
        let tree = Tree::from_entries(vec![
            Entry::file("a-b", 1, at(1)),
            Entry::file("a/x", 1, at(1)),
        ]);
        let paths: Vec<_> = tree.entries().iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a-b", "a/", "a/x"]);
    }

    #[test]
    fn test_from_entries_dedupes_keeping_last() {
        let tree = Tree::from_entries(vec![
            Entry::file("a.txt", 1, at(1)),
            Entry::file("a.txt", 2, at(2)),
        ]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("a.txt").unwrap().size, 2);
    }

    #[test]
    fn test_identical_trees_produce_empty_patch() {
        let tree = Tree::from_entries(vec![Entry::file("x/y.js", 3, at(5))]);
        assert!(tree.calculate_patch(&tree.clone()).is_empty());
    }

    #[test]
    fn test_patch_from_empty_creates_dirs_first() {
        let next = Tree::from_entries(vec![Entry::file("lib/a.js", 1, at(1))]);
        let patch = Tree::new().calculate_patch(&next);
        assert_eq!(
            ops(&patch),
            vec![
                (Operation::Mkdir, "lib/".to_string()),
                (Operation::Create, "lib/a.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_patch_to_empty_removes_children_first() {
        let prev = Tree::from_entries(vec![
            Entry::file("lib/a.js", 1, at(1)),
            Entry::file("lib/sub/b.js", 1, at(1)),
        ]);
        let patch = prev.calculate_patch(&Tree::new());
        assert_eq!(
            ops(&patch),
            vec![
                (Operation::Unlink, "lib/sub/b.js".to_string()),
                (Operation::Rmdir, "lib/sub/".to_string()),
                (Operation::Unlink, "lib/a.js".to_string()),
                (Operation::Rmdir, "lib/".to_string()),
            ]
        );
    }

    #[test]
    fn test_patch_detects_change_by_size_and_mtime() {
        let prev = Tree::from_entries(vec![
            Entry::file("a.js", 1, at(1)),
            Entry::file("b.js", 1, at(1)),
            Entry::file("c.js", 1, at(1)),
        ]);
        let next = Tree::from_entries(vec![
            Entry::file("a.js", 2, at(1)),
            Entry::file("b.js", 1, at(9)),
            Entry::file("c.js", 1, at(1)),
        ]);
        assert_eq!(
            ops(&prev.calculate_patch(&next)),
            vec![
                (Operation::Change, "a.js".to_string()),
                (Operation::Change, "b.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_directories_never_change() {
        let mut dir = Entry::directory("d");
        let prev = Tree::from_entries(vec![dir.clone()]);
        dir.mtime = at(100);
        let next = Tree::from_entries(vec![dir]);
        assert!(prev.calculate_patch(&next).is_empty());
    }

    #[test]
    fn test_kind_flip_removes_before_adding() {
        let prev = Tree::from_entries(vec![Entry::file("x", 1, at(1))]);
        let next = Tree::from_entries(vec![Entry::file("x/inner", 1, at(1))]);
        assert_eq!(
            ops(&prev.calculate_patch(&next)),
            vec![
                (Operation::Unlink, "x".to_string()),
                (Operation::Mkdir, "x/".to_string()),
                (Operation::Create, "x/inner".to_string()),
            ]
        );
    }

    #[test]
    fn test_patch_summary() {
        let next = Tree::from_entries(vec![
            Entry::file("a/b.js", 1, at(1)),
            Entry::file("c.js", 1, at(1)),
        ]);
        let patch = Tree::new().calculate_patch(&next);
        assert_eq!(patch.summary(), "mkdir=1 create=2");
        assert_eq!(patch.count(Operation::Create), 2);
    }

    #[test]
    fn test_from_dir_walks_posix_paths() -> Result<()> {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("src/nested")).unwrap();
        std::fs::write(temp_dir.path().join("src/nested/a.js"), b"abc").unwrap();
        std::fs::write(temp_dir.path().join("top.txt"), b"t").unwrap();

        let tree = Tree::from_dir(temp_dir.path())?;
        let paths: Vec<_> = tree.entries().iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/", "src/nested/", "src/nested/a.js", "top.txt"]);
        assert_eq!(tree.get("src/nested/a.js").unwrap().size, 3);
        assert!(tree.get("src/").unwrap().is_directory());
        Ok(())
    }

    #[test]
    fn test_from_dir_missing_root_is_io_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Tree::from_dir(&temp_dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, crate::Error::Io { .. }));
    }

    #[test]
    fn test_has_glob_chars() {
        assert!(has_glob_chars("*.js"));
        assert!(has_glob_chars("a/{b,c}.js"));
        assert!(!has_glob_chars("lib/main.js"));
    }
}
