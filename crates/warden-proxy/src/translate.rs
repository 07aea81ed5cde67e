//! Provider record to runtime options translation.
//!
//! The baseline [`Options`] are shared by every provider and never mutated;
//! each translation works on its own clone.

use url::Url;
use warden_config::{Options, ProviderRecord, ProxyMode};

use crate::mode::resolve_upstream;
use crate::tls::{Certificate, CertificateLoader, load_certificate};

/// `acr_values` identifying the identity provider's default authorization flow.
pub const DEFAULT_ACR_VALUES: &str = "goauthentik.io/providers/oauth2/default";

/// Options and optional client certificate for one provider.
#[derive(Debug)]
pub struct Translation {
    pub options: Options,
    pub certificate: Option<Certificate>,
}

/// Translate a provider record on top of the shared baseline.
///
/// Returns `None` when the external host does not parse; the caller skips the
/// provider and keeps configuring the others. A certificate that fails to load
/// only disables mutual TLS for this provider.
pub fn translate(
    provider: &ProviderRecord,
    baseline: &Options,
    certificates: &dyn CertificateLoader,
) -> Option<Translation> {
    let external_host = match Url::parse(&provider.external_host) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(
                provider = %provider.name,
                external_host = %provider.external_host,
                error = %e,
                "Failed to parse URL, skipping provider"
            );
            return None;
        }
    };

    let mut options = baseline.clone();

    options.client_id = provider.client_id.clone();
    options.client_secret = provider.client_secret.clone();
    options.cookie.secret = provider.cookie_secret.clone();
    options.cookie.secure = external_host.scheme() == "https";

    let oidc = &provider.oidc_configuration;
    options.skip_oidc_discovery = true;
    options.oidc_issuer_url = oidc.issuer.clone();
    options.login_url = oidc.authorization_endpoint.clone();
    options.redeem_url = oidc.token_endpoint.clone();
    options.oidc_jwks_url = oidc.jwks_uri.clone();
    options.profile_url = oidc.userinfo_endpoint.clone();
    options.validate_url = oidc.userinfo_endpoint.clone();
    options.acr_values = DEFAULT_ACR_VALUES.to_string();

    if !provider.skip_path_regex.is_empty() {
        options.skip_auth_regex = split_skip_regexes(&provider.skip_path_regex);
    }

    options.upstream_servers = vec![resolve_upstream(
        provider.mode,
        &provider.internal_host,
        provider.internal_host_ssl_validation,
    )];

    if provider.mode == ProxyMode::ForwardDomain {
        // A missing domain becomes an empty entry, which validation rejects.
        options.cookie.domains = vec![provider.cookie_domain.clone().unwrap_or_default()];
    }

    let certificate = provider.certificate.as_deref().and_then(|reference| {
        tracing::debug!(provider = %provider.name, "Enabling TLS");
        match load_certificate(reference, certificates) {
            Ok(certificate) => Some(certificate),
            Err(e) => {
                tracing::warn!(
                    provider = %provider.name,
                    certificate = %reference,
                    error = %e,
                    "Failed to fetch certificate"
                );
                None
            }
        }
    });

    Some(Translation {
        options,
        certificate,
    })
}

/// Split a newline-delimited regex list; an empty string yields no rules.
pub fn split_skip_regexes(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('\n').map(str::to_string).collect()
}
