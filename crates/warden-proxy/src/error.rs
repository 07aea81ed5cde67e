//! Error types for bundle construction and the authentication engine.

use warden_config::ValidationError;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors raised while turning a provider record into a bundle.
///
/// Only [`BuildError::InvalidExternalHost`] is scoped to a single provider.
/// Every other variant means the global configuration is unusable and the
/// process must not serve traffic with it; see [`BuildError::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// External host could not be parsed; the provider is skipped.
    #[error("provider '{provider}' skipped: invalid external host {host:?}")]
    InvalidExternalHost { provider: String, host: String },

    /// `https_address` could not be split into host and port.
    #[error("invalid HTTPS address {address:?}: {reason}")]
    InvalidHttpsAddress { address: String, reason: String },

    /// Translated options failed validation.
    #[error("provider '{provider}': {source}")]
    Validation {
        provider: String,
        #[source]
        source: ValidationError,
    },

    /// The authentication engine refused the options.
    #[error("provider '{provider}': failed to initialise authentication engine: {source}")]
    Engine {
        provider: String,
        #[source]
        source: EngineError,
    },
}

impl BuildError {
    /// Check if this error must stop the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BuildError::InvalidExternalHost { .. })
    }
}

/// Errors that can occur inside the authentication engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// Identity provider or upstream returned an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}
