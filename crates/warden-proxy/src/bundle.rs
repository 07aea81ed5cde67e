//! Provider bundle: everything needed to serve one protected application.
//!
//! A bundle is built once per provider record per load, either completely or
//! not at all, and is immutable afterwards. Reloads replace bundles wholesale.

use std::sync::Arc;

use axum::{extract::Request, response::Response};
use tower::ServiceExt;
use url::Url;
use warden_config::{Options, ProviderRecord, ProxyMode, validate};

use crate::chain::{ProxyHandler, assemble};
use crate::engine::{BasicAuthMapping, EngineFactory, EngineInputs, EngineLink};
use crate::error::{BuildError, Result};
use crate::tls::{Certificate, CertificateLoader};
use crate::translate::{Translation, translate};

/// Shared collaborators for building bundles.
#[derive(Clone)]
pub struct BuildContext {
    /// Baseline options every provider starts from. Never mutated.
    pub baseline: Arc<Options>,
    pub certificates: Arc<dyn CertificateLoader>,
    /// Outbound client for identity provider calls.
    pub client: reqwest::Client,
    pub engines: Arc<dyn EngineFactory>,
}

impl BuildContext {
    pub fn new(
        baseline: Options,
        certificates: Arc<dyn CertificateLoader>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            baseline: Arc::new(baseline),
            certificates,
            client: reqwest::Client::new(),
            engines,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

/// A fully built provider.
pub struct ProviderBundle {
    name: String,
    external_host: String,
    host: String,
    end_session_url: String,
    mode: ProxyMode,
    options: Options,
    certificate: Option<Arc<Certificate>>,
    handler: ProxyHandler,
}

impl ProviderBundle {
    /// Build a bundle from a provider record.
    ///
    /// [`BuildError::InvalidExternalHost`] means only this provider is
    /// skipped; any other error is fatal for the whole configuration.
    pub fn build(provider: &ProviderRecord, ctx: &BuildContext) -> Result<Self> {
        let invalid_host = || BuildError::InvalidExternalHost {
            provider: provider.name.clone(),
            host: provider.external_host.clone(),
        };

        let Some(Translation {
            options,
            certificate,
        }) = translate(provider, &ctx.baseline, ctx.certificates.as_ref())
        else {
            return Err(invalid_host());
        };
        let host = routing_host(&provider.external_host).ok_or_else(invalid_host)?;

        let chain = assemble(&options)?;

        validate(&options).map_err(|source| BuildError::Validation {
            provider: provider.name.clone(),
            source,
        })?;

        let certificate = certificate.map(Arc::new);
        let mut engine = ctx
            .engines
            .create(EngineInputs {
                options: options.clone(),
                provider,
                client: ctx.client.clone(),
                certificate: certificate.clone(),
            })
            .map_err(|source| BuildError::Engine {
                provider: provider.name.clone(),
                source,
            })?;

        if provider.basic_auth.enabled {
            engine.enable_basic_auth(BasicAuthMapping {
                user_attribute: provider.basic_auth.user_attribute.clone(),
                password_attribute: provider.basic_auth.password_attribute.clone(),
            });
        }

        let end_session_url = provider.oidc_configuration.end_session_endpoint.clone();
        engine.finalize(EngineLink {
            external_host: provider.external_host.clone(),
            end_session_endpoint: end_session_url.clone(),
        });

        let handler = chain.then(Arc::from(engine));

        tracing::info!(
            provider = %provider.name,
            host = %host,
            mode = %provider.mode,
            mtls = certificate.is_some(),
            "Built provider bundle"
        );

        Ok(Self {
            name: provider.name.clone(),
            external_host: provider.external_host.clone(),
            host,
            end_session_url,
            mode: provider.mode,
            options,
            certificate,
            handler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// External host URL as published.
    pub fn external_host(&self) -> &str {
        &self.external_host
    }

    /// Lowercase `host[:port]` requests are routed by.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn end_session_url(&self) -> &str {
        &self.end_session_url
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Validated options the engine runs with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Cookie domain shared across subdomains, forward-domain mode only.
    pub fn cookie_domain(&self) -> Option<&str> {
        match self.mode {
            ProxyMode::ForwardDomain => self.options.cookie.domains.first().map(String::as_str),
            ProxyMode::ForwardSingle | ProxyMode::Proxy => None,
        }
    }

    /// Client certificate loaded for this provider.
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_deref()
    }

    /// Request handler for this provider.
    pub fn handler(&self) -> ProxyHandler {
        self.handler.clone()
    }

    /// Handle one request.
    pub async fn serve(&self, request: Request) -> Response {
        self.handler
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|e| match e {})
    }
}

impl std::fmt::Debug for ProviderBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBundle")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("mode", &self.mode)
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

/// `host[:port]` of an external host URL, port only when explicit.
fn routing_host(external_host: &str) -> Option<String> {
    let url = Url::parse(external_host).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::StatusCode, response::IntoResponse};
    use parking_lot::Mutex;
    use warden_config::{BasicAuthAttributes, OidcConfiguration};

    use crate::engine::AuthEngine;
    use crate::error::EngineError;
    use crate::proxy::OAuthProxyFactory;
    use crate::session::MemorySessionStore;
    use crate::tls::CertificateError;

    struct NoCertificates;

    impl CertificateLoader for NoCertificates {
        fn load(&self, reference: &str) -> std::result::Result<Certificate, CertificateError> {
            Err(CertificateError::NoCertificates(reference.to_string()))
        }
    }

    struct GeneratedCertificates;

    impl CertificateLoader for GeneratedCertificates {
        fn load(&self, reference: &str) -> std::result::Result<Certificate, CertificateError> {
            let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
            Certificate::from_pem(
                reference,
                cert.cert.pem().as_bytes(),
                cert.key_pair.serialize_pem().as_bytes(),
            )
        }
    }

    /// What the bundle handed to the engine after construction.
    #[derive(Default)]
    struct Seen {
        basic_auth: Option<BasicAuthMapping>,
        link: Option<EngineLink>,
    }

    struct RecordingEngine {
        seen: Arc<Mutex<Seen>>,
    }

    #[async_trait]
    impl AuthEngine for RecordingEngine {
        async fn handle(&self, _request: Request) -> Response {
            StatusCode::ACCEPTED.into_response()
        }

        fn enable_basic_auth(&mut self, mapping: BasicAuthMapping) {
            self.seen.lock().basic_auth = Some(mapping);
        }

        fn finalize(&mut self, link: EngineLink) {
            self.seen.lock().link = Some(link);
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        seen: Arc<Mutex<Seen>>,
        fail: bool,
    }

    impl EngineFactory for RecordingFactory {
        fn create(
            &self,
            _inputs: EngineInputs<'_>,
        ) -> std::result::Result<Box<dyn AuthEngine>, EngineError> {
            if self.fail {
                return Err(EngineError::Config("refused".to_string()));
            }
            Ok(Box::new(RecordingEngine {
                seen: self.seen.clone(),
            }))
        }
    }

    fn record(mode: ProxyMode) -> ProviderRecord {
        ProviderRecord {
            name: "wiki".to_string(),
            external_host: "https://Wiki.Example.com".to_string(),
            internal_host: "http://wiki.internal:8080".to_string(),
            internal_host_ssl_validation: true,
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            cookie_secret: "0123456789abcdef".to_string(),
            cookie_domain: None,
            mode,
            oidc_configuration: OidcConfiguration {
                issuer: "https://sso.example.com/".to_string(),
                authorization_endpoint: "https://sso.example.com/authorize".to_string(),
                token_endpoint: "https://sso.example.com/token".to_string(),
                jwks_uri: "https://sso.example.com/jwks".to_string(),
                userinfo_endpoint: "https://sso.example.com/userinfo".to_string(),
                end_session_endpoint: "https://sso.example.com/end-session".to_string(),
            },
            certificate: None,
            skip_path_regex: String::new(),
            basic_auth: BasicAuthAttributes::default(),
        }
    }

    fn context(factory: Arc<dyn EngineFactory>) -> BuildContext {
        BuildContext::new(Options::default(), Arc::new(NoCertificates), factory)
    }

    fn oauth_context() -> BuildContext {
        context(Arc::new(OAuthProxyFactory::new(MemorySessionStore::shared())))
    }

    #[tokio::test]
    async fn test_build_forward_single() {
        let bundle = ProviderBundle::build(&record(ProxyMode::ForwardSingle), &oauth_context())
            .unwrap();

        assert_eq!(bundle.name(), "wiki");
        assert_eq!(bundle.host(), "wiki.example.com");
        assert_eq!(bundle.end_session_url(), "https://sso.example.com/end-session");
        assert!(bundle.cookie_domain().is_none());
        assert!(bundle.certificate().is_none());

        let ping = bundle
            .serve(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await;
        assert_eq!(ping.status(), StatusCode::OK);

        let app = bundle
            .serve(Request::builder().uri("/page").body(Body::empty()).unwrap())
            .await;
        assert_eq!(app.status(), StatusCode::FOUND);
    }

    #[test]
    fn test_build_proxy_mode() {
        let bundle = ProviderBundle::build(&record(ProxyMode::Proxy), &oauth_context()).unwrap();
        assert_eq!(bundle.mode(), ProxyMode::Proxy);
        assert!(!bundle.options().upstream_servers[0].is_static());
    }

    #[test]
    fn test_invalid_external_host_skipped() {
        let mut record = record(ProxyMode::Proxy);
        record.external_host = "not a url".to_string();

        let err = ProviderBundle::build(&record, &oauth_context()).unwrap_err();
        assert!(matches!(err, BuildError::InvalidExternalHost { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_forward_domain_without_domain_is_fatal() {
        let err = ProviderBundle::build(&record(ProxyMode::ForwardDomain), &oauth_context())
            .unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_forward_domain_cookie_domain() {
        let mut record = record(ProxyMode::ForwardDomain);
        record.cookie_domain = Some("example.com".to_string());

        let bundle = ProviderBundle::build(&record, &oauth_context()).unwrap();
        assert_eq!(bundle.cookie_domain(), Some("example.com"));
    }

    #[test]
    fn test_bad_cookie_secret_is_fatal() {
        let mut record = record(ProxyMode::Proxy);
        record.cookie_secret = "short".to_string();

        let err = ProviderBundle::build(&record, &oauth_context()).unwrap_err();
        match err {
            BuildError::Validation { provider, source } => {
                assert_eq!(provider, "wiki");
                assert!(source.problems.iter().any(|p| p.contains("cookie.secret")));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_trailing_newline_in_skip_regex_is_fatal() {
        let mut record = record(ProxyMode::ForwardSingle);
        record.skip_path_regex = "^/public/\n".to_string();

        let err = ProviderBundle::build(&record, &oauth_context()).unwrap_err();
        match err {
            BuildError::Validation { source, .. } => {
                assert!(source.problems.iter().any(|p| p.contains("skip_auth_regex")));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bad_https_address_is_fatal() {
        let mut baseline = Options::default();
        baseline.force_https = true;
        baseline.https_address = "no-port".to_string();
        let ctx = BuildContext::new(
            baseline,
            Arc::new(NoCertificates),
            Arc::new(RecordingFactory::default()),
        );

        let err = ProviderBundle::build(&record(ProxyMode::Proxy), &ctx).unwrap_err();
        assert!(matches!(err, BuildError::InvalidHttpsAddress { .. }));
    }

    #[test]
    fn test_engine_failure_is_fatal() {
        let factory = RecordingFactory {
            fail: true,
            ..Default::default()
        };
        let err = ProviderBundle::build(&record(ProxyMode::Proxy), &context(Arc::new(factory)))
            .unwrap_err();
        assert!(matches!(err, BuildError::Engine { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_engine_receives_basic_auth_and_link() {
        let factory = RecordingFactory::default();
        let seen = factory.seen.clone();

        let mut record = record(ProxyMode::Proxy);
        record.basic_auth = BasicAuthAttributes {
            enabled: true,
            user_attribute: "uid".to_string(),
            password_attribute: "token".to_string(),
        };
        ProviderBundle::build(&record, &context(Arc::new(factory))).unwrap();

        let seen = seen.lock();
        assert_eq!(
            seen.basic_auth,
            Some(BasicAuthMapping {
                user_attribute: "uid".to_string(),
                password_attribute: "token".to_string(),
            })
        );
        assert_eq!(
            seen.link,
            Some(EngineLink {
                external_host: "https://Wiki.Example.com".to_string(),
                end_session_endpoint: "https://sso.example.com/end-session".to_string(),
            })
        );
    }

    #[test]
    fn test_basic_auth_disabled_not_injected() {
        let factory = RecordingFactory::default();
        let seen = factory.seen.clone();

        ProviderBundle::build(&record(ProxyMode::Proxy), &context(Arc::new(factory))).unwrap();
        assert!(seen.lock().basic_auth.is_none());
        assert!(seen.lock().link.is_some());
    }

    #[test]
    fn test_certificate_attached() {
        let mut record = record(ProxyMode::Proxy);
        record.certificate = Some("wiki-mtls".to_string());
        let ctx = BuildContext::new(
            Options::default(),
            Arc::new(GeneratedCertificates),
            Arc::new(OAuthProxyFactory::new(MemorySessionStore::shared())),
        );

        let bundle = ProviderBundle::build(&record, &ctx).unwrap();
        assert_eq!(bundle.certificate().unwrap().reference(), "wiki-mtls");
    }

    #[test]
    fn test_missing_certificate_not_fatal() {
        let mut record = record(ProxyMode::Proxy);
        record.certificate = Some("absent".to_string());

        let bundle = ProviderBundle::build(&record, &oauth_context()).unwrap();
        assert!(bundle.certificate().is_none());
    }

    #[test]
    fn test_build_is_deterministic() {
        let ctx = oauth_context();
        let record = record(ProxyMode::ForwardSingle);

        let first = ProviderBundle::build(&record, &ctx).unwrap();
        let second = ProviderBundle::build(&record, &ctx).unwrap();
        assert_eq!(first.options(), second.options());
        assert_eq!(*ctx.baseline, Options::default());
    }

    #[test]
    fn test_routing_host() {
        assert_eq!(routing_host("https://App.example.com/x").as_deref(), Some("app.example.com"));
        assert_eq!(
            routing_host("http://app.example.com:8080").as_deref(),
            Some("app.example.com:8080")
        );
        assert_eq!(routing_host("https://app.example.com:443").as_deref(), Some("app.example.com"));
        assert!(routing_host("mailto:someone@example.com").is_none());
    }
}
