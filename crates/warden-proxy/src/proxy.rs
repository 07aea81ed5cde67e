//! OIDC reverse-authentication engine.
//!
//! [`OAuthProxy`] is the terminal handler of a provider chain. It owns the
//! sign-in, callback and sign-out endpoints under the proxy prefix, lets
//! skip-auth paths through, and either answers with the static upstream
//! (forward-auth modes) or forwards the request to the internal host (proxy
//! mode) once a session exists.

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::StreamExt;
use regex::RegexSet;
use url::{Url, form_urlencoded};
use warden_config::{Options, ProxyMode, Upstream, UpstreamTarget};

use crate::engine::{AuthEngine, BasicAuthMapping, EngineFactory, EngineInputs, EngineLink};
use crate::error::EngineError;
use crate::oauth::{build_authorization_url, exchange_code, fetch_profile, generate_state};
use crate::session::{
    PendingLogin, Session, SharedSessionStore, clear_session_cookie, read_cookie, session_cookie,
};
use crate::tls::Certificate;

/// Authenticated user name passed to the upstream.
pub const AUTH_USER_HEADER: &str = "x-auth-request-user";

/// Authenticated user email passed to the upstream.
pub const AUTH_EMAIL_HEADER: &str = "x-auth-request-email";

/// Original request URI set by forward-auth callers.
pub const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";

/// Original host set by forward-auth callers.
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Largest request body forwarded to an upstream.
pub const MAX_FORWARD_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Headers that only apply to a single connection.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Path and query the engine acts on.
///
/// Forward-auth callers send the original URI in `X-Forwarded-Uri`; for them
/// that header wins over the request line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    path: String,
    query: Option<String>,
}

impl Target {
    fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// OIDC authentication engine for one provider.
pub struct OAuthProxy {
    provider: String,
    mode: ProxyMode,
    options: Options,
    skip_auth: RegexSet,
    upstream: Upstream,
    /// Client for identity provider calls.
    client: reqwest::Client,
    /// Client for upstream calls; carries the TLS policy of the upstream.
    upstream_client: reqwest::Client,
    sessions: SharedSessionStore,
    basic_auth: Option<BasicAuthMapping>,
    link: EngineLink,
}

impl OAuthProxy {
    /// Create an engine from validated options.
    pub fn new(inputs: EngineInputs<'_>, sessions: SharedSessionStore) -> Result<Self, EngineError> {
        let EngineInputs {
            options,
            provider,
            client,
            certificate,
        } = inputs;

        let skip_auth = RegexSet::new(&options.skip_auth_regex)
            .map_err(|e| EngineError::Config(format!("invalid skip-auth regex: {}", e)))?;

        let upstream = match options.upstream_servers.as_slice() {
            [upstream] => upstream.clone(),
            other => {
                return Err(EngineError::Config(format!(
                    "expected exactly one upstream, got {}",
                    other.len()
                )));
            }
        };

        let upstream_client =
            build_upstream_client(&provider.name, &upstream, certificate.as_deref(), &client)?;

        Ok(Self {
            provider: provider.name.clone(),
            mode: provider.mode,
            options,
            skip_auth,
            upstream,
            client,
            upstream_client,
            sessions,
            basic_auth: None,
            link: EngineLink::default(),
        })
    }

    /// Options the engine was built from.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn target(&self, request: &Request) -> Target {
        let forwarded = self
            .mode
            .is_forward()
            .then(|| header_str(request.headers(), FORWARDED_URI_HEADER))
            .flatten();

        match forwarded {
            Some(uri) => {
                let (path, query) = match uri.split_once('?') {
                    Some((path, query)) => (path, Some(query.to_string())),
                    None => (uri, None),
                };
                Target {
                    path: path.to_string(),
                    query,
                }
            }
            None => Target {
                path: request.uri().path().to_string(),
                query: request.uri().query().map(str::to_string),
            },
        }
    }

    /// URL to return to after sign-in.
    fn original_url(&self, headers: &HeaderMap, target: &Target) -> String {
        if self.mode.is_forward()
            && let Some(host) = header_str(headers, FORWARDED_HOST_HEADER)
        {
            let proto = header_str(headers, crate::middleware::FORWARDED_PROTO_HEADER)
                .unwrap_or(self.default_scheme());
            return format!("{}://{}{}", proto, host, target.path_and_query());
        }
        target.path_and_query()
    }

    fn default_scheme(&self) -> &'static str {
        if self.options.cookie.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Callback URL registered with the identity provider.
    fn redirect_uri(&self, headers: &HeaderMap) -> String {
        let callback = self.options.callback_path();
        if !self.link.external_host.is_empty() {
            return format!("{}{}", self.link.external_host.trim_end_matches('/'), callback);
        }

        let host = header_str(headers, FORWARDED_HOST_HEADER)
            .or_else(|| header_str(headers, header::HOST.as_str()))
            .unwrap_or("localhost");
        let proto = header_str(headers, crate::middleware::FORWARDED_PROTO_HEADER)
            .unwrap_or(self.default_scheme());
        format!("{}://{}{}", proto, host, callback)
    }

    /// Only relative paths or URLs on hosts this provider protects are
    /// followed after sign-in.
    fn safe_redirect(&self, target: &str) -> String {
        // Browsers drop tabs and newlines inside URLs, so "/\t/host" becomes "//host".
        if target.is_empty() || target.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return "/".to_string();
        }
        let allowed = if target.starts_with('/') {
            self.relative_stays_local(target)
        } else {
            Url::parse(target).is_ok_and(|url| {
                matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|h| self.is_own_host(h))
            })
        };
        if allowed { target.to_string() } else { "/".to_string() }
    }

    /// A relative target must resolve to the same origin it is joined to.
    fn relative_stays_local(&self, target: &str) -> bool {
        if target.starts_with("//") || target.starts_with("/\\") {
            return false;
        }
        let Ok(base) = Url::parse(&self.link.external_host)
            .or_else(|_| Url::parse("http://localhost/"))
        else {
            return false;
        };
        base.join(target)
            .is_ok_and(|joined| joined.host_str() == base.host_str() && joined.port() == base.port())
    }

    fn is_own_host(&self, host: &str) -> bool {
        let external = Url::parse(&self.link.external_host).ok();
        if external.as_ref().and_then(Url::host_str) == Some(host) {
            return true;
        }
        self.options
            .cookie
            .domains
            .iter()
            .map(|d| d.trim_start_matches('.'))
            .filter(|d| !d.is_empty())
            .any(|d| host == d || host.ends_with(&format!(".{}", d)))
    }

    fn session(&self, headers: &HeaderMap) -> Option<Session> {
        let id = read_cookie(headers, &self.options.cookie.name)?;
        let session = self.sessions.load(&id)?;
        if session.provider != self.provider {
            tracing::debug!(
                provider = %self.provider,
                session_provider = %session.provider,
                "Ignoring session of another provider"
            );
            return None;
        }
        Some(session)
    }

    fn start_login(&self, headers: &HeaderMap, redirect: String) -> Response {
        let state = generate_state();
        let redirect_uri = self.redirect_uri(headers);

        let location = match build_authorization_url(&self.options, &redirect_uri, &state) {
            Ok(url) => url,
            Err(e) => return ProxyError::from(e).into_response(),
        };

        self.sessions
            .save_pending(&state, PendingLogin::new(&self.provider, redirect));
        tracing::debug!(provider = %self.provider, "Redirecting to authorization endpoint");
        found(&location, None)
    }

    async fn callback(&self, headers: &HeaderMap, target: &Target) -> Result<Response, ProxyError> {
        let query = target.query.as_deref();

        if let Some(error) = query_param(query, "error") {
            tracing::warn!(provider = %self.provider, error = %error, "Identity provider returned an error");
            return Ok((StatusCode::FORBIDDEN, format!("Login failed: {}", error)).into_response());
        }

        let code = query_param(query, "code")
            .ok_or_else(|| EngineError::InvalidRequest("missing code".to_string()))?;
        let state = query_param(query, "state")
            .ok_or_else(|| EngineError::InvalidRequest("missing state".to_string()))?;

        let pending = match self.sessions.take_pending(&state) {
            Some(pending) if pending.provider == self.provider => pending,
            _ => {
                tracing::warn!(provider = %self.provider, "Unknown or expired login state");
                return Ok((StatusCode::FORBIDDEN, "Invalid login state").into_response());
            }
        };

        let redirect_uri = self.redirect_uri(headers);
        let tokens = exchange_code(&self.client, &self.options, &code, &redirect_uri).await?;
        let claims = fetch_profile(&self.client, &self.options, &tokens.access_token).await?;

        let session = Session::new(&self.provider, claims, self.options.cookie.expire_secs);
        tracing::info!(
            provider = %self.provider,
            user = %session.user,
            "Session created"
        );
        let cookie = session_cookie(&self.options.cookie, &session.id);
        self.sessions.save(session);

        Ok(found(&pending.redirect, Some(cookie)))
    }

    fn sign_out(&self, headers: &HeaderMap) -> Response {
        if let Some(id) = read_cookie(headers, &self.options.cookie.name) {
            self.sessions.remove(&id);
        }
        tracing::debug!(provider = %self.provider, "Signed out");

        let location = if self.link.end_session_endpoint.is_empty() {
            "/"
        } else {
            self.link.end_session_endpoint.as_str()
        };
        found(location, Some(clear_session_cookie(&self.options.cookie)))
    }

    /// Set identity headers for the upstream, replacing anything the client sent.
    fn identity_headers(&self, session: Option<&Session>, headers: &mut HeaderMap) {
        headers.remove(AUTH_USER_HEADER);
        headers.remove(AUTH_EMAIL_HEADER);

        let Some(session) = session else {
            return;
        };

        if let Ok(value) = HeaderValue::from_bytes(session.user.as_bytes()) {
            headers.insert(AUTH_USER_HEADER, value);
        }
        if !session.email.is_empty()
            && let Ok(value) = HeaderValue::from_bytes(session.email.as_bytes())
        {
            headers.insert(AUTH_EMAIL_HEADER, value);
        }
        if let Some(value) = self.basic_auth_header(session) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    fn basic_auth_header(&self, session: &Session) -> Option<HeaderValue> {
        let mapping = self.basic_auth.as_ref()?;
        let user = session.attribute(&mapping.user_attribute);
        let password = session.attribute(&mapping.password_attribute);

        let (Some(user), Some(password)) = (user, password) else {
            tracing::debug!(
                provider = %self.provider,
                user_attribute = %mapping.user_attribute,
                password_attribute = %mapping.password_attribute,
                "Basic-Auth attributes missing from session"
            );
            return None;
        };

        let credentials = STANDARD.encode(format!("{}:{}", user, password));
        HeaderValue::from_str(&format!("Basic {}", credentials)).ok()
    }

    async fn serve_upstream(
        &self,
        request: Request,
        session: Option<&Session>,
    ) -> Result<Response, ProxyError> {
        match &self.upstream.target {
            UpstreamTarget::Static { code } => {
                let status = StatusCode::from_u16(*code).unwrap_or(StatusCode::ACCEPTED);
                let mut response = status.into_response();
                self.identity_headers(session, response.headers_mut());
                Ok(response)
            }
            UpstreamTarget::Uri { uri, .. } => self.forward(uri, request, session).await,
        }
    }

    async fn forward(
        &self,
        base: &str,
        request: Request,
        session: Option<&Session>,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let url = format!("{}{}", base.trim_end_matches('/'), path_and_query);

        let body = axum::body::to_bytes(body, MAX_FORWARD_BODY_BYTES)
            .await
            .map_err(|e| EngineError::InvalidRequest(format!("Failed to read request body: {}", e)))?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(FORWARDED_HOST_HEADER, host.clone());
        }
        self.identity_headers(session, &mut headers);

        tracing::debug!(provider = %self.provider, url = %url, "Forwarding request upstream");

        let upstream_response = self
            .upstream_client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("Upstream request failed: {}", e)))?;

        let status = upstream_response.status();
        let headers = strip_hop_by_hop(upstream_response.headers());
        let stream = upstream_response
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    async fn dispatch(&self, request: Request) -> Result<Response, ProxyError> {
        let target = self.target(&request);
        let headers = request.headers().clone();

        if target.path == self.options.sign_in_path() {
            let redirect = query_param(target.query.as_deref(), "rd")
                .map(|rd| self.safe_redirect(&rd))
                .unwrap_or_else(|| "/".to_string());
            return Ok(self.start_login(&headers, redirect));
        }
        if target.path == self.options.callback_path() {
            return self.callback(&headers, &target).await;
        }
        if target.path == self.options.sign_out_path() {
            return Ok(self.sign_out(&headers));
        }

        let session = self.session(&headers);
        if session.is_some() || self.skip_auth.is_match(&target.path) {
            return self.serve_upstream(request, session.as_ref()).await;
        }

        let redirect = self.safe_redirect(&self.original_url(&headers, &target));
        Ok(self.start_login(&headers, redirect))
    }
}

#[async_trait]
impl AuthEngine for OAuthProxy {
    async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e.0, "Request failed");
                e.into_response()
            }
        }
    }

    fn enable_basic_auth(&mut self, mapping: BasicAuthMapping) {
        self.basic_auth = Some(mapping);
    }

    fn finalize(&mut self, link: EngineLink) {
        self.link = link;
    }
}

/// Builds [`OAuthProxy`] engines sharing one session store.
pub struct OAuthProxyFactory {
    sessions: SharedSessionStore,
}

impl OAuthProxyFactory {
    pub fn new(sessions: SharedSessionStore) -> Self {
        Self { sessions }
    }
}

impl EngineFactory for OAuthProxyFactory {
    fn create(&self, inputs: EngineInputs<'_>) -> Result<Box<dyn AuthEngine>, EngineError> {
        Ok(Box::new(OAuthProxy::new(inputs, self.sessions.clone())?))
    }
}

fn build_upstream_client(
    provider: &str,
    upstream: &Upstream,
    certificate: Option<&Certificate>,
    shared: &reqwest::Client,
) -> Result<reqwest::Client, EngineError> {
    let UpstreamTarget::Uri {
        insecure_skip_tls_verify,
        ..
    } = &upstream.target
    else {
        return Ok(shared.clone());
    };

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(*insecure_skip_tls_verify);

    if let Some(certificate) = certificate {
        match certificate.identity() {
            Ok(identity) => builder = builder.identity(identity),
            Err(e) => tracing::warn!(
                provider = %provider,
                error = %e,
                "Client certificate unusable, continuing without mutual TLS"
            ),
        }
    }

    builder
        .build()
        .map_err(|e| EngineError::Config(format!("Failed to build upstream client: {}", e)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    headers
}

fn found(location: &str, cookie: Option<String>) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(header::LOCATION, value);
        }
        Err(_) => {
            headers.insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        headers.insert(header::SET_COOKIE, cookie);
    }
    response
}

/// Error type for engine responses.
#[derive(Debug)]
pub struct ProxyError(EngineError);

impl From<EngineError> for ProxyError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self.0 {
            EngineError::Backend(msg) => (StatusCode::BAD_GATEWAY, "backend_error", msg.clone()),
            EngineError::Network(msg) => (StatusCode::BAD_GATEWAY, "network_error", msg.clone()),
            EngineError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            EngineError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
        };

        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message
            }
        });

        (status, Json(body)).into_response()
    }
}
