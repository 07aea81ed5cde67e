//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                 # listener settings
//! [options]                # baseline proxy options shared by every provider
//! [options.cookie]         # session cookie defaults
//! [options.logging]        # request logging behaviour
//! ```

use serde::{Deserialize, Serialize};

/// Default listen address for the proxy.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";

/// Default prefix for the proxy's own endpoints (sign-in, callback, sign-out).
pub const DEFAULT_PROXY_PREFIX: &str = "/oauth2";

/// Default health-check path.
pub const DEFAULT_PING_PATH: &str = "/ping";

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "_warden_proxy";

/// Default session lifetime (7 days).
pub const DEFAULT_COOKIE_EXPIRE_SECS: u64 = 7 * 24 * 60 * 60;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Listener configuration.
    pub server: ServerConfig,

    /// Baseline options copied into every provider.
    pub options: Options,
}

impl WardenConfig {
    /// Create a config with defaults everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the plain HTTP listener binds to.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Options
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime options for one provider's authentication engine.
///
/// The `[options]` table of the config file fills in the shared baseline;
/// provider-specific fields (client credentials, endpoints, upstreams) are
/// left empty there and written per provider by the options translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Prefix under which the proxy serves its own endpoints.
    pub proxy_prefix: String,

    /// Health-check path answered before authentication.
    pub ping_path: String,

    /// User agent treated as a health probe regardless of path. Empty disables.
    pub ping_user_agent: String,

    /// Redirect plain HTTP requests to HTTPS.
    pub force_https: bool,

    /// Plain HTTP listen address.
    pub http_address: String,

    /// HTTPS listen address; its port is the redirect target when
    /// `force_https` is set.
    pub https_address: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Scopes requested at the authorization endpoint.
    pub scope: String,

    /// Skip fetching `/.well-known/openid-configuration`; endpoints below are
    /// used verbatim.
    pub skip_oidc_discovery: bool,

    /// OIDC issuer URL.
    pub oidc_issuer_url: String,

    /// Authorization endpoint.
    pub login_url: String,

    /// Token endpoint.
    pub redeem_url: String,

    /// JWKS endpoint.
    pub oidc_jwks_url: String,

    /// Userinfo endpoint used to build the session profile.
    pub profile_url: String,

    /// Endpoint used to re-validate an access token.
    pub validate_url: String,

    /// `acr_values` sent with the authorization request.
    pub acr_values: String,

    /// Request path regexes that bypass authentication.
    pub skip_auth_regex: Vec<String>,

    /// Upstream servers. A built provider always has exactly one.
    pub upstream_servers: Vec<Upstream>,

    /// Session cookie policy.
    pub cookie: CookieOptions,

    /// Request logging behaviour.
    pub logging: LoggingOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
            ping_path: DEFAULT_PING_PATH.to_string(),
            ping_user_agent: String::new(),
            force_https: false,
            http_address: "0.0.0.0:4180".to_string(),
            https_address: ":443".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "openid email profile".to_string(),
            skip_oidc_discovery: false,
            oidc_issuer_url: String::new(),
            login_url: String::new(),
            redeem_url: String::new(),
            oidc_jwks_url: String::new(),
            profile_url: String::new(),
            validate_url: String::new(),
            acr_values: String::new(),
            skip_auth_regex: Vec::new(),
            upstream_servers: Vec::new(),
            cookie: CookieOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl Options {
    /// Path of the OAuth callback endpoint.
    pub fn callback_path(&self) -> String {
        format!("{}/callback", self.proxy_prefix)
    }

    /// Path that starts a sign-in.
    pub fn sign_in_path(&self) -> String {
        format!("{}/start", self.proxy_prefix)
    }

    /// Path that ends the session.
    pub fn sign_out_path(&self) -> String {
        format!("{}/sign_out", self.proxy_prefix)
    }
}

/// Session cookie policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    /// Cookie name.
    pub name: String,

    /// Secret bound to the session cookie. Must be 16, 24 or 32 bytes, raw
    /// or base64 encoded.
    pub secret: String,

    /// Domains the cookie is valid for. Empty means host-only.
    pub domains: Vec<String>,

    /// Cookie path.
    pub path: String,

    /// Session lifetime in seconds.
    pub expire_secs: u64,

    /// Set the `Secure` attribute.
    pub secure: bool,

    /// Set the `HttpOnly` attribute.
    pub http_only: bool,

    /// `SameSite` attribute.
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            secret: String::new(),
            domains: Vec::new(),
            path: "/".to_string(),
            expire_secs: DEFAULT_COOKIE_EXPIRE_SECS,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

/// Cookie `SameSite` attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    /// Attribute value as written in `Set-Cookie`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Request logging options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Keep health-check requests out of the request log.
    pub silence_ping: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstreams
// ─────────────────────────────────────────────────────────────────────────────

/// One upstream server behind the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    /// Identifier, unique within a provider.
    pub id: String,

    /// Path prefix routed to this upstream.
    pub path: String,

    /// Where matching requests go.
    #[serde(flatten)]
    pub target: UpstreamTarget,
}

/// Upstream destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamTarget {
    /// Answer with a fixed status code once authentication succeeded.
    Static { code: u16 },

    /// Forward to a real server.
    Uri {
        uri: String,
        insecure_skip_tls_verify: bool,
    },
}

impl Upstream {
    /// Check if this upstream is a static responder.
    pub fn is_static(&self) -> bool {
        matches!(self.target, UpstreamTarget::Static { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.proxy_prefix, "/oauth2");
        assert_eq!(options.ping_path, "/ping");
        assert!(!options.skip_oidc_discovery);
        assert!(options.upstream_servers.is_empty());
        assert_eq!(options.cookie.name, DEFAULT_COOKIE_NAME);
        assert!(options.cookie.domains.is_empty());
    }

    #[test]
    fn test_endpoint_paths() {
        let options = Options {
            proxy_prefix: "/outpost".to_string(),
            ..Default::default()
        };
        assert_eq!(options.callback_path(), "/outpost/callback");
        assert_eq!(options.sign_in_path(), "/outpost/start");
        assert_eq!(options.sign_out_path(), "/outpost/sign_out");
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = WardenConfig::from_toml(
            r#"
[server]
listen = "127.0.0.1:8000"

[options]
force_https = true
https_address = "0.0.0.0:8443"

[options.cookie]
name = "_sso"
same_site = "strict"

[options.logging]
silence_ping = true
"#,
        )
        .unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:8000");
        assert!(config.options.force_https);
        assert_eq!(config.options.https_address, "0.0.0.0:8443");
        assert_eq!(config.options.cookie.name, "_sso");
        assert_eq!(config.options.cookie.same_site, SameSite::Strict);
        assert_eq!(config.options.cookie.path, "/");
        assert!(config.options.logging.silence_ping);
        assert_eq!(config.options.ping_path, DEFAULT_PING_PATH);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = WardenConfig::from_toml("").unwrap();
        assert_eq!(config, WardenConfig::default());
    }

    #[test]
    fn test_toml_roundtrip_keeps_upstreams() {
        let mut config = WardenConfig::new();
        config.options.upstream_servers = vec![Upstream {
            id: "static".to_string(),
            path: "/".to_string(),
            target: UpstreamTarget::Static { code: 202 },
        }];

        let toml_str = config.to_toml().unwrap();
        let parsed = WardenConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
