//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use warden_config::{ProviderRecord, WardenConfig};
use warden_proxy::{BuildContext, MemorySessionStore, OAuthProxyFactory, PemDirectoryLoader};

pub mod check;
pub mod serve;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Where configuration, provider records and certificates come from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Path to the config file
    #[arg(long, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    pub config: PathBuf,

    /// Path to the provider records (JSON array)
    #[arg(long, env = "WARDEN_PROVIDERS", default_value = "providers.json")]
    pub providers: PathBuf,

    /// Directory holding `<name>.crt` / `<name>.key` client certificates
    #[arg(long, env = "WARDEN_CERTS", default_value = "certs")]
    pub certs: PathBuf,
}

impl SourceArgs {
    /// Load the config file.
    pub fn load_config(&self) -> Result<WardenConfig> {
        warden_config::load_config_file(&self.config)
            .with_context(|| format!("loading config from {}", self.config.display()))
    }

    /// Load the provider records.
    pub fn load_providers(&self) -> Result<Vec<ProviderRecord>> {
        warden_config::load_providers(&self.providers)
            .with_context(|| format!("loading providers from {}", self.providers.display()))
    }

    /// Collaborators every bundle is built with.
    pub fn build_context(&self, config: &WardenConfig) -> BuildContext {
        BuildContext::new(
            config.options.clone(),
            Arc::new(PemDirectoryLoader::new(&self.certs)),
            Arc::new(OAuthProxyFactory::new(MemorySessionStore::shared())),
        )
    }
}
