//! Configuration for the Hive sync client.
//!
//! Settings persist to disk as `config.ron` and can be overridden from the
//! command line. Every section is `#[serde(default)]`, so older or partial
//! files keep loading as new settings are added.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, PlayerConfig, SyncConfig, default_config_dir};
pub use error::ConfigError;
