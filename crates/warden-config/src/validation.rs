//! Semantic validation of runtime options.
//!
//! Validation is the last gate before an authentication engine is built from
//! a set of [`Options`]. Every problem is collected so that one run reports
//! the whole list instead of the first failure.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use regex::Regex;
use url::Url;

use crate::types::{Options, Upstream, UpstreamTarget};

/// Accepted cookie secret lengths in bytes.
const COOKIE_SECRET_LENGTHS: [usize; 3] = [16, 24, 32];

/// Options failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration:\n  {}", .problems.join("\n  "))]
pub struct ValidationError {
    /// Human-readable description of each problem.
    pub problems: Vec<String>,
}

/// Validate a fully translated set of options.
pub fn validate(options: &Options) -> Result<(), ValidationError> {
    let mut problems = Vec::new();

    if options.client_id.is_empty() {
        problems.push("missing setting: client_id".to_string());
    }
    if options.client_secret.is_empty() {
        problems.push("missing setting: client_secret".to_string());
    }

    validate_prefix(options, &mut problems);
    validate_cookie(options, &mut problems);
    validate_endpoints(options, &mut problems);

    for pattern in &options.skip_auth_regex {
        // An empty pattern matches every path.
        if pattern.trim().is_empty() {
            problems.push("skip_auth_regex must not contain empty entries".to_string());
        } else if let Err(e) = Regex::new(pattern) {
            problems.push(format!("error compiling skip_auth_regex {:?}: {}", pattern, e));
        }
    }

    validate_upstreams(&options.upstream_servers, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { problems })
    }
}

fn validate_prefix(options: &Options, problems: &mut Vec<String>) {
    if !options.proxy_prefix.starts_with('/') || options.proxy_prefix.ends_with('/') {
        problems.push(format!(
            "proxy_prefix {:?} must start with '/' and must not end with '/'",
            options.proxy_prefix
        ));
    }
}

fn validate_cookie(options: &Options, problems: &mut Vec<String>) {
    let cookie = &options.cookie;

    if cookie.name.is_empty() || !cookie.name.chars().all(is_cookie_name_char) {
        problems.push(format!("invalid cookie name: {:?}", cookie.name));
    }

    if cookie.secret.is_empty() {
        problems.push("missing setting: cookie.secret".to_string());
    } else if secret_bytes(&cookie.secret).is_none() {
        problems.push(format!(
            "cookie.secret must be 16, 24, or 32 bytes to create an AES cipher, but is {} bytes",
            cookie.secret.len()
        ));
    }

    if cookie.domains.iter().any(|d| d.trim().is_empty()) {
        problems.push("cookie.domains must not contain empty entries".to_string());
    }

    if !cookie.path.starts_with('/') {
        problems.push(format!("cookie.path {:?} must start with '/'", cookie.path));
    }
}

/// Resolve the cookie secret to raw bytes, accepting raw or base64 forms.
fn secret_bytes(secret: &str) -> Option<Vec<u8>> {
    if COOKIE_SECRET_LENGTHS.contains(&secret.len()) {
        return Some(secret.as_bytes().to_vec());
    }

    [&URL_SAFE, &URL_SAFE_NO_PAD, &STANDARD]
        .iter()
        .filter_map(|engine| engine.decode(secret).ok())
        .find(|decoded| COOKIE_SECRET_LENGTHS.contains(&decoded.len()))
}

fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

fn validate_endpoints(options: &Options, problems: &mut Vec<String>) {
    if !options.skip_oidc_discovery {
        if options.oidc_issuer_url.is_empty() {
            problems.push("missing setting: oidc_issuer_url".to_string());
        }
        return;
    }

    let required = [
        ("oidc_issuer_url", &options.oidc_issuer_url),
        ("login_url", &options.login_url),
        ("redeem_url", &options.redeem_url),
        ("oidc_jwks_url", &options.oidc_jwks_url),
    ];
    for (field, value) in required {
        if value.is_empty() {
            problems.push(format!(
                "missing setting: {} (required when skip_oidc_discovery is set)",
                field
            ));
        } else if let Err(e) = Url::parse(value) {
            problems.push(format!("error parsing {}={:?}: {}", field, value, e));
        }
    }

    let optional = [
        ("profile_url", &options.profile_url),
        ("validate_url", &options.validate_url),
    ];
    for (field, value) in optional {
        if !value.is_empty()
            && let Err(e) = Url::parse(value)
        {
            problems.push(format!("error parsing {}={:?}: {}", field, value, e));
        }
    }
}

fn validate_upstreams(upstreams: &[Upstream], problems: &mut Vec<String>) {
    if upstreams.len() != 1 {
        problems.push(format!(
            "exactly one upstream is required, found {}",
            upstreams.len()
        ));
    }

    for upstream in upstreams {
        if upstream.id.is_empty() {
            problems.push("upstream has an empty id".to_string());
        }
        if !upstream.path.starts_with('/') {
            problems.push(format!(
                "upstream {:?}: path {:?} must start with '/'",
                upstream.id, upstream.path
            ));
        }

        match &upstream.target {
            UpstreamTarget::Static { code } => {
                if !(100..=599).contains(code) {
                    problems.push(format!(
                        "upstream {:?}: invalid static response code {}",
                        upstream.id, code
                    ));
                }
            }
            UpstreamTarget::Uri { uri, .. } => match Url::parse(uri) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => problems.push(format!(
                    "upstream {:?}: unsupported scheme {:?}",
                    upstream.id,
                    url.scheme()
                )),
                Err(e) => problems.push(format!(
                    "upstream {:?}: error parsing uri {:?}: {}",
                    upstream.id, uri, e
                )),
            },
        }
    }
}
