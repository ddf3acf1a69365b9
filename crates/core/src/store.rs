//! On-disk content-addressed store for cached transform results
//!
//! Layout under the cache root:
//! ```text
//! <root>/
//!   <namespace>/          # first 16 hex chars of BLAKE3(cache key)
//!     <hh>/<rest>         # one entry per content key
//! ```
//!
//! Every entry is a small header followed by the zstd-compressed payload.
//! Writes go through a temp file and a rename, so concurrent writers of the
//! same key simply race and the last rename wins.

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{hash_bytes, Blake3Hash};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Entry header format (version 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeaderV1 {
    /// Length of the payload before compression
    pub orig_len: u64,
}

impl EntryHeaderV1 {
    const MAGIC: [u8; 4] = *b"LMC1";
    /// magic(4) + orig_len(8)
    pub const LEN: usize = 12;

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&Self::MAGIC);
        out[4..].copy_from_slice(&self.orig_len.to_le_bytes());
        out
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN || bytes[..4] != Self::MAGIC {
            return None;
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[4..Self::LEN]);
        Some(Self {
            orig_len: u64::from_le_bytes(len),
        })
    }
}

/// Content-addressed store scoped to one cache key
#[derive(Debug, Clone)]
pub struct DiskStore {
    /// Namespace directory (root + namespace)
    dir: PathBuf,
}

impl DiskStore {
    /// zstd level; entries are small text payloads
    const LEVEL: i32 = 3;

    /// Open (and create) the store for `cache_key` under `root`
    pub fn open(root: &Path, cache_key: &str) -> Result<Self> {
        let namespace = hash_bytes(cache_key.as_bytes()).to_hex();
        let dir = root.join(&namespace[..16]);
        fs::create_dir_all(&dir).at(&dir)?;
        debug!("persistent cache for {:?} at {}", cache_key, dir.display());
        Ok(Self { dir })
    }

    /// Directory holding this namespace's entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the filesystem path for an entry
    pub fn entry_path(&self, key: &Blake3Hash) -> PathBuf {
        let hex = key.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Read an entry; `Ok(None)` on a miss
    pub fn get(&self, key: &Blake3Hash) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };

        let header = EntryHeaderV1::from_bytes(&raw).ok_or_else(|| Error::Cache {
            path: path.clone(),
            message: "bad entry header".to_string(),
        })?;
        let payload = zstd::decode_all(&raw[EntryHeaderV1::LEN..]).map_err(|e| Error::Cache {
            path: path.clone(),
            message: format!("decompression failed: {e}"),
        })?;
        if payload.len() as u64 != header.orig_len {
            return Err(Error::Cache {
                path,
                message: format!(
                    "length mismatch: header says {}, payload has {}",
                    header.orig_len,
                    payload.len()
                ),
            });
        }
        Ok(Some(payload))
    }

    /// Store an entry, replacing any previous one
    pub fn put(&self, key: &Blake3Hash, payload: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let compressed = zstd::encode_all(payload, Self::LEVEL).at(&path)?;

        let mut data = Vec::with_capacity(EntryHeaderV1::LEN + compressed.len());
        data.extend_from_slice(
            &EntryHeaderV1 {
                orig_len: payload.len() as u64,
            }
            .to_bytes(),
        );
        data.extend_from_slice(&compressed);

        atomic_write(&path, &data).at(&path)
    }

    /// Whether an entry exists
    pub fn contains(&self, key: &Blake3Hash) -> bool {
        self.entry_path(key).is_file()
    }
}

/// Atomic write helper
///
/// Writes data to a temporary file next to the target, then renames it
/// over the target path.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
