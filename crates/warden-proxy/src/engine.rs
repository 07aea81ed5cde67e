//! Authentication engine seam.
//!
//! The engine is the terminal handler of every provider chain. It is built
//! from validated options by an [`EngineFactory`], then receives two narrow
//! post-construction steps from the owning bundle: optional Basic-Auth
//! injection and the [`EngineLink`] back-reference. After that it is shared
//! read-only across request tasks.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use warden_config::{Options, ProviderRecord};

use crate::error::EngineError;
use crate::tls::Certificate;

/// Session attributes used to build an `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthMapping {
    pub user_attribute: String,
    pub password_attribute: String,
}

/// Fields the bundle owns and hands to the engine it wraps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineLink {
    pub external_host: String,
    pub end_session_endpoint: String,
}

/// Everything an engine is constructed from.
pub struct EngineInputs<'a> {
    /// Validated options for this provider.
    pub options: Options,
    /// The provider record.
    pub provider: &'a ProviderRecord,
    /// Shared outbound client for identity provider calls.
    pub client: reqwest::Client,
    /// Client certificate for mutual TLS to the upstream.
    pub certificate: Option<Arc<Certificate>>,
}

/// Terminal request handler enforcing authentication.
#[async_trait]
pub trait AuthEngine: Send + Sync {
    /// Handle one request.
    async fn handle(&self, request: Request) -> Response;

    /// Inject `Authorization: Basic` on upstream requests.
    fn enable_basic_auth(&mut self, mapping: BasicAuthMapping);

    /// Receive the bundle's external host and end-session endpoint.
    fn finalize(&mut self, link: EngineLink);
}

/// Builds engines from validated options.
pub trait EngineFactory: Send + Sync {
    fn create(&self, inputs: EngineInputs<'_>) -> Result<Box<dyn AuthEngine>, EngineError>;
}
