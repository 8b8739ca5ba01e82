//! Configuration error types.

/// Errors that can occur when loading, saving, parsing, or validating
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read `config.ron` from disk.
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    /// Failed to write `config.ron` to disk.
    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),

    /// The file is not valid RON for [`crate::Config`].
    #[error("failed to parse config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// Serializing the config back to RON failed.
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),

    /// A setting parsed but holds a value the client cannot run with.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending setting, e.g. `network.server_port`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
