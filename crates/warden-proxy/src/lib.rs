//! Per-provider OIDC authentication bundles for Warden.
//!
//! Turns declarative provider records into request handlers that enforce
//! authentication in front of protected applications.
//!
//! # Components
//!
//! - [`mode`]: proxy mode to upstream shape
//! - [`translate`]: provider record plus shared baseline to runtime options
//! - [`tls`]: client certificate loading for mutual TLS
//! - [`chain`]: ordered middleware chain around the authentication engine
//! - [`bundle`]: one fully built provider
//! - [`registry`]: host-routed bundles with atomic reload
//! - [`proxy`]: the shipped OIDC engine
//! - [`oauth`]: authorization code flow against the identity provider
//! - [`session`]: server-side sessions and the session cookie

pub mod bundle;
pub mod chain;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod mode;
pub mod oauth;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod tls;
pub mod translate;

pub use bundle::{BuildContext, ProviderBundle};
pub use chain::{Chain, ProxyHandler, Stage, assemble};
pub use engine::{AuthEngine, BasicAuthMapping, EngineFactory, EngineInputs, EngineLink};
pub use error::{BuildError, EngineError, Result};
pub use mode::resolve_upstream;
pub use proxy::{OAuthProxy, OAuthProxyFactory};
pub use registry::{ProviderRegistry, ReloadReport};
pub use session::{MemorySessionStore, Session, SessionStore, SharedSessionStore};
pub use tls::{Certificate, CertificateError, CertificateLoader, PemDirectoryLoader};
pub use translate::{Translation, translate};
