//! Content hashing for persistent cache keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte BLAKE3 digest
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, 64 characters
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(data: &[u8]) -> Blake3Hash {
    blake3::hash(data).into()
}

/// Key for one file's transform result: its content plus where it lives.
///
/// The NUL separator keeps `("ab", "c")` and `("a", "bc")` apart.
pub fn content_key(content: &[u8], relative_path: &str) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content);
    hasher.update(&[0]);
    hasher.update(relative_path.as_bytes());
    hasher.finalize().into()
}
