//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration or provider records.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Failed to parse the provider record list.
    #[error("failed to parse provider records from '{path}': {source}")]
    ParseProviders {
        path: String,
        source: serde_json::Error,
    },

    /// Two provider records share a name.
    #[error("duplicate provider name '{0}'")]
    DuplicateProvider(String),
}
