//! Provider records published by the control plane.
//!
//! A provider is one protected application. Records are immutable inputs;
//! everything the proxy needs at runtime is derived from them.

use serde::{Deserialize, Serialize};

/// How the proxy sits in front of the application.
///
/// Unknown values are rejected when a record is deserialized, so no other
/// mode can reach bundle construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Forward-auth for a single application host.
    #[serde(alias = "forward-single")]
    ForwardSingle,
    /// Forward-auth for every subdomain of a cookie domain.
    #[serde(alias = "forward-domain")]
    ForwardDomain,
    /// Transparent reverse proxy to the internal host.
    Proxy,
}

impl ProxyMode {
    /// Check if this is one of the forward-auth modes.
    pub fn is_forward(&self) -> bool {
        matches!(self, ProxyMode::ForwardSingle | ProxyMode::ForwardDomain)
    }

    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::ForwardSingle => "forward_single",
            ProxyMode::ForwardDomain => "forward_domain",
            ProxyMode::Proxy => "proxy",
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issuer metadata, supplied verbatim instead of being discovered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: String,
}

/// Mapping from session attributes to an injected `Authorization: Basic`
/// header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthAttributes {
    #[serde(default, rename = "basic_auth_enabled")]
    pub enabled: bool,
    #[serde(default, rename = "basic_auth_user_attribute")]
    pub user_attribute: String,
    #[serde(default, rename = "basic_auth_password_attribute")]
    pub password_attribute: String,
}

/// One protected application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Display name, used in logs.
    pub name: String,

    /// Public URL of the application.
    pub external_host: String,

    /// Where authenticated traffic is forwarded in [`ProxyMode::Proxy`].
    #[serde(default)]
    pub internal_host: String,

    /// Verify the internal host's TLS certificate.
    #[serde(default = "default_true")]
    pub internal_host_ssl_validation: bool,

    pub client_id: String,
    pub client_secret: String,
    pub cookie_secret: String,

    /// Cookie domain shared by all subdomains in [`ProxyMode::ForwardDomain`].
    #[serde(default)]
    pub cookie_domain: Option<String>,

    pub mode: ProxyMode,

    pub oidc_configuration: OidcConfiguration,

    /// Reference to a client certificate for mutual TLS to the upstream.
    #[serde(default)]
    pub certificate: Option<String>,

    /// Newline-separated regexes of paths that skip authentication.
    #[serde(default)]
    pub skip_path_regex: String,

    #[serde(flatten)]
    pub basic_auth: BasicAuthAttributes,
}

fn default_true() -> bool {
    true
}

impl ProviderRecord {
    /// Parse a single record from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
