//! Error taxonomy shared by every node

use std::path::PathBuf;
use thiserror::Error;

/// Common result type used throughout loam
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error returned by pluggable transformers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while constructing or building a node
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing option, raised by constructors
    #[error("{node}: invalid configuration: {message}")]
    Config { node: String, message: String },

    /// No input file matched and the node does not allow an empty result
    #[error("{node}: nothing matched {what}")]
    NothingMatched { node: String, what: String },

    /// A directory or file the node requires is absent
    #[error("{node}: input path does not exist: {}", path.display())]
    MissingInput { node: String, path: PathBuf },

    /// The pluggable transform failed for one file
    #[error("failed to process {relative_path} (in {}): {source}", src_dir.display())]
    Transform {
        relative_path: String,
        src_dir: PathBuf,
        #[source]
        source: BoxError,
    },

    /// `post_process` produced no result
    #[error("post_process must return a result (file: {relative_path})")]
    MissingPostProcessOutput { relative_path: String },

    /// Persistent cache entry could not be read or written
    #[error("cache error at {}: {message}", path.display())]
    Cache { path: PathBuf, message: String },

    /// Filesystem failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory walk failure
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// Serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error for the named node
    pub fn config(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised at construction time
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::MissingPostProcessOutput { .. })
    }
}

/// Extension for attaching a path to `std::io::Result`
pub trait IoResultExt<T> {
    /// Convert the error into [`Error::Io`] naming `path`
    fn at(self, path: impl Into<PathBuf>) -> Result<T, Error>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, Error> {
        self.map_err(|e| Error::io(path, e))
    }
}
