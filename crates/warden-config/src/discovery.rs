//! Loading the process config and the published provider records from disk.

use std::collections::HashSet;
use std::path::Path;

use crate::{ConfigError, ProviderRecord, Result, WardenConfig};

/// Load and parse a `warden.toml` config file.
pub fn load_config_file(path: &Path) -> Result<WardenConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = WardenConfig::from_toml(&content)?;
    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Load the provider records published by the control plane.
///
/// The file holds a JSON array of [`ProviderRecord`]s. Provider names must be
/// unique; records with an unknown proxy mode fail the whole load.
pub fn load_providers(path: &Path) -> Result<Vec<ProviderRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;

    let records: Vec<ProviderRecord> =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseProviders {
            path: path.display().to_string(),
            source: e,
        })?;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(record.name.as_str()) {
            return Err(ConfigError::DuplicateProvider(record.name.clone()));
        }
    }

    tracing::debug!(path = %path.display(), count = records.len(), "Loaded provider records");
    Ok(records)
}
