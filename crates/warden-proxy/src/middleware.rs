//! Middleware stages placed in front of the authentication engine.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header set by TLS-terminating proxies in front of Warden.
pub const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

// ─────────────────────────────────────────────────────────────────────────────
// HTTPS redirect
// ─────────────────────────────────────────────────────────────────────────────

/// Redirect plain HTTP requests to HTTPS on `port`.
pub async fn redirect_to_https(
    State(port): State<String>,
    request: Request,
    next: Next,
) -> Response {
    if is_https(&request) {
        return next.run(request).await;
    }

    let Some(host) = request_host(request.headers(), &request) else {
        return next.run(request).await;
    };

    let hostname = strip_port(&host);
    let authority = if port.is_empty() || port == "443" {
        hostname.to_string()
    } else {
        format!("{}:{}", hostname, port)
    };
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = format!("https://{}{}", authority, path);

    tracing::debug!(location = %location, "Redirecting to HTTPS");
    (
        StatusCode::PERMANENT_REDIRECT,
        [(header::LOCATION, location)],
    )
        .into_response()
}

fn is_https(request: &Request) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    request
        .headers()
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

fn request_host(headers: &HeaderMap, request: &Request) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// Drop a trailing `:port`, leaving bracketed IPv6 literals intact.
pub(crate) fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Health check
// ─────────────────────────────────────────────────────────────────────────────

/// Paths and user agents answered with `200 OK` before authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheck {
    paths: Vec<String>,
    user_agents: Vec<String>,
}

impl HealthCheck {
    /// Create a health check; empty entries are ignored.
    pub fn new(paths: Vec<String>, user_agents: Vec<String>) -> Self {
        Self {
            paths: paths.into_iter().filter(|p| !p.is_empty()).collect(),
            user_agents: user_agents.into_iter().filter(|u| !u.is_empty()).collect(),
        }
    }

    /// Check if a request is a health probe.
    pub fn matches(&self, request: &Request) -> bool {
        let path = request.uri().path();
        if self.paths.iter().any(|p| p == path) {
            return true;
        }
        request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| self.user_agents.iter().any(|u| u == ua))
    }
}

/// Answer health probes without touching later stages.
pub async fn health_check(
    State(check): State<Arc<HealthCheck>>,
    request: Request,
    next: Next,
) -> Response {
    if check.matches(&request) {
        return (StatusCode::OK, "OK").into_response();
    }
    next.run(request).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Structured request logging middleware.
///
/// Logs request details including host, method, path, status, and duration.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let path = request.uri().path().to_string();

    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(
            host = %host,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            host = %host,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            host = %host,
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
