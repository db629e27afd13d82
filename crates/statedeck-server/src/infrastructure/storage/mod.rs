//! Storage infrastructure: the TOML configuration file.

pub mod config;

pub use config::{load_config, AppConfig, ConfigError, FeatureEntry};
