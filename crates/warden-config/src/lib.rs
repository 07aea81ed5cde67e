//! Configuration system for the Warden authentication proxy.
//!
//! Provides:
//! - [`ProviderRecord`]: the declarative description of one protected
//!   application, as published by the control plane
//! - [`Options`]: the runtime options consumed by the OIDC proxy engine,
//!   with a shared baseline loaded from TOML
//! - [`validate`]: semantic validation run before an engine is built
//! - File loading for the process config (`warden.toml`) and provider
//!   records (JSON)

pub mod discovery;
pub mod error;
pub mod provider;
pub mod types;
pub mod validation;

pub use discovery::{load_config_file, load_providers};
pub use error::{ConfigError, Result};
pub use provider::{BasicAuthAttributes, OidcConfiguration, ProviderRecord, ProxyMode};
pub use types::*;
pub use validation::{ValidationError, validate};
