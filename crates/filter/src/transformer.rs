//! The pluggable per-file transformation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output of one transformation plus free-form metadata
///
/// Serialized flat, e.g. `{"output": "...", "sourceMap": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub output: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl TransformResult {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl From<String> for TransformResult {
    fn from(output: String) -> Self {
        Self::new(output)
    }
}

impl From<&str> for TransformResult {
    fn from(output: &str) -> Self {
        Self::new(output)
    }
}

/// A text transformation applied to one file at a time
///
/// Implementations must be deterministic for a given `cache_key()`: the
/// persistent cache reuses results across processes.
pub trait ContentTransformer: Send + Sync {
    /// Short name used in logs and as the default cache key
    fn name(&self) -> &str;

    /// Transform the content of `relative_path`
    fn process_string(&self, content: &str, relative_path: &str) -> anyhow::Result<TransformResult>;

    /// Adjust a (possibly cached) result before it is written
    ///
    /// Returning `Ok(None)` is a fatal configuration error.
    fn post_process(
        &self,
        result: TransformResult,
        _relative_path: &str,
    ) -> anyhow::Result<Option<TransformResult>> {
        Ok(Some(result))
    }

    /// Namespace of this transformer's persistent cache entries
    ///
    /// Change it whenever the transformation's behavior changes.
    fn cache_key(&self) -> String {
        format!("{}@{}", self.name(), env!("CARGO_PKG_VERSION"))
    }
}
