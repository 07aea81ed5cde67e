//! Upstream selection by proxy mode.

use warden_config::{ProxyMode, Upstream, UpstreamTarget};

/// Identifier of the static responder used by forward-auth modes.
pub const STATIC_UPSTREAM_ID: &str = "static";

/// Identifier of the real upstream used by proxy mode.
pub const DEFAULT_UPSTREAM_ID: &str = "default";

/// Status answered by the static responder once a request is authenticated.
pub const FORWARD_AUTH_STATUS: u16 = 202;

/// Decide the single upstream for a provider.
///
/// Forward-auth modes never forward traffic: an external reverse proxy only
/// asks whether the request is authorized, and a `202` means yes. Proxy mode
/// forwards to the internal host, skipping certificate verification when the
/// provider disables TLS validation.
pub fn resolve_upstream(
    mode: ProxyMode,
    internal_host: &str,
    internal_host_ssl_validation: bool,
) -> Upstream {
    match mode {
        ProxyMode::ForwardSingle | ProxyMode::ForwardDomain => Upstream {
            id: STATIC_UPSTREAM_ID.to_string(),
            path: "/".to_string(),
            target: UpstreamTarget::Static {
                code: FORWARD_AUTH_STATUS,
            },
        },
        ProxyMode::Proxy => Upstream {
            id: DEFAULT_UPSTREAM_ID.to_string(),
            path: "/".to_string(),
            target: UpstreamTarget::Uri {
                uri: internal_host.to_string(),
                insecure_skip_tls_verify: !internal_host_ssl_validation,
            },
        },
    }
}
