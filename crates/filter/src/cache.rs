//! Cache strategies for transform results

use crate::transformer::{ContentTransformer, TransformResult};
use loam_core::{content_key, DiskStore, Error, Result, Settings};
use std::path::Path;
use tracing::{debug, info, warn};

/// How transform results are reused, fixed at construction
#[derive(Debug, Clone)]
pub enum CacheStrategy {
    /// Always run the transformer
    NoCache,
    /// Reuse results stored on disk, keyed by content and path
    ContentAddressedDiskCache(DiskStore),
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Uncached,
    Hit,
    Miss,
}

impl CacheStrategy {
    /// Pick the strategy for a transformer
    ///
    /// Persistence is only granted when `settings` allow it (see
    /// `FORCE_PERSISTENCE_IN_CI`).
    pub fn select(persist: bool, settings: &Settings, transformer: &dyn ContentTransformer) -> Result<Self> {
        if !persist {
            return Ok(CacheStrategy::NoCache);
        }
        if !settings.persistence_allowed {
            info!(
                "{}: persistent cache disabled in CI (set FORCE_PERSISTENCE_IN_CI to enable)",
                transformer.name()
            );
            return Ok(CacheStrategy::NoCache);
        }
        let store = DiskStore::open(&settings.cache_root, &transformer.cache_key())?;
        Ok(CacheStrategy::ContentAddressedDiskCache(store))
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, CacheStrategy::ContentAddressedDiskCache(_))
    }

    /// Produce the transform result for one file
    pub fn process(
        &self,
        transformer: &dyn ContentTransformer,
        content: &str,
        relative_path: &str,
        src_dir: &Path,
    ) -> Result<(TransformResult, CacheLookup)> {
        let transform = || {
            transformer
                .process_string(content, relative_path)
                .map_err(|e| Error::Transform {
                    relative_path: relative_path.to_string(),
                    src_dir: src_dir.to_path_buf(),
                    source: e.into(),
                })
        };

        let store = match self {
            CacheStrategy::NoCache => return Ok((transform()?, CacheLookup::Uncached)),
            CacheStrategy::ContentAddressedDiskCache(store) => store,
        };

        let key = content_key(content.as_bytes(), relative_path);
        match store.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<TransformResult>(&bytes) {
                Ok(result) => {
                    debug!("cache hit {} ({})", relative_path, key);
                    return Ok((result, CacheLookup::Hit));
                }
                Err(e) => warn!("unreadable cache entry for {}: {}; recomputing", relative_path, e),
            },
            Ok(None) => {}
            Err(e) => warn!("{}; recomputing {}", e, relative_path),
        }

        let result = transform()?;
        let payload = serde_json::to_vec(&result)?;
        if let Err(e) = store.put(&key, &payload) {
            warn!("failed to cache {}: {}", relative_path, e);
        }
        Ok((result, CacheLookup::Miss))
    }
}
