//! Pipeline driver and configuration for the `loam` command

pub mod builder;
pub mod config;
pub mod transforms;

pub use builder::{BuildError, Builder, CancelHandle, NodeReport};
pub use config::{ConfigError, PipelineConfig, CONFIG_FILE};
pub use transforms::{Banner, Replace};
