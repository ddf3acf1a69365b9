//! Built-in content transformers for filter nodes

use filter::{ContentTransformer, TransformResult};
use loam_core::hash_bytes;
use std::collections::BTreeMap;

/// Literal substitutions, applied in key order
#[derive(Debug, Clone)]
pub struct Replace {
    replacements: BTreeMap<String, String>,
    cache_key: String,
}

impl Replace {
    pub fn new(replacements: BTreeMap<String, String>) -> Self {
        let mut config = Vec::new();
        for (from, to) in &replacements {
            config.extend_from_slice(&(from.len() as u64).to_le_bytes());
            config.extend_from_slice(from.as_bytes());
            config.extend_from_slice(&(to.len() as u64).to_le_bytes());
            config.extend_from_slice(to.as_bytes());
        }
        let cache_key = format!(
            "replace@{}-{}",
            env!("CARGO_PKG_VERSION"),
            hash_bytes(&config).to_hex()
        );
        Self {
            replacements,
            cache_key,
        }
    }
}

impl ContentTransformer for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn process_string(&self, content: &str, _relative_path: &str) -> anyhow::Result<TransformResult> {
        let mut output = content.to_string();
        for (from, to) in &self.replacements {
            if from.is_empty() {
                continue;
            }
            output = output.replace(from.as_str(), to);
        }
        Ok(output.into())
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }
}

/// Prepends fixed text to every file
#[derive(Debug, Clone)]
pub struct Banner {
    text: String,
    cache_key: String,
}

impl Banner {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let cache_key = format!(
            "banner@{}-{}",
            env!("CARGO_PKG_VERSION"),
            hash_bytes(text.as_bytes()).to_hex()
        );
        Self { text, cache_key }
    }
}

impl ContentTransformer for Banner {
    fn name(&self) -> &str {
        "banner"
    }

    fn process_string(&self, content: &str, _relative_path: &str) -> anyhow::Result<TransformResult> {
        Ok(format!("{}{}", self.text, content).into())
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }
}
