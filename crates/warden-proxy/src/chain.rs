//! Ordered middleware chain wrapped around the authentication engine.
//!
//! Stage order is fixed:
//!
//! 1. HTTPS redirect, when `force_https` is set
//! 2. Health check and request logging; health check first when
//!    `logging.silence_ping` is set so probes never reach the log
//! 3. The authentication engine as terminal handler

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
};
use tower::{Layer, service_fn, util::BoxCloneSyncService};
use warden_config::Options;

use crate::engine::AuthEngine;
use crate::error::BuildError;
use crate::middleware::{self, HealthCheck};

/// Request handler for one provider.
pub type ProxyHandler = BoxCloneSyncService<Request, Response, Infallible>;

/// One stage of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Redirect plain HTTP to HTTPS on `port`.
    HttpsRedirect { port: String },
    /// Answer health probes.
    HealthCheck(HealthCheck),
    /// Log every request that reaches this stage.
    RequestLogging,
}

/// Assembled stages, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    /// Stages in invocation order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `engine` as the terminal handler.
    pub fn then(&self, engine: Arc<dyn AuthEngine>) -> ProxyHandler {
        let mut service = BoxCloneSyncService::new(service_fn(move |request: Request| {
            let engine = engine.clone();
            async move { Ok::<_, Infallible>(engine.handle(request).await) }
        }));

        for stage in self.stages.iter().rev() {
            service = match stage {
                Stage::HttpsRedirect { port } => BoxCloneSyncService::new(
                    from_fn_with_state(port.clone(), middleware::redirect_to_https).layer(service),
                ),
                Stage::HealthCheck(check) => BoxCloneSyncService::new(
                    from_fn_with_state(Arc::new(check.clone()), middleware::health_check)
                        .layer(service),
                ),
                Stage::RequestLogging => {
                    BoxCloneSyncService::new(from_fn(middleware::request_logging).layer(service))
                }
            };
        }

        service
    }
}

/// Build the middleware chain for a set of options.
///
/// A malformed `https_address` is a fatal configuration error: it is global,
/// not specific to one provider.
pub fn assemble(options: &Options) -> Result<Chain, BuildError> {
    let mut stages = Vec::with_capacity(3);

    if options.force_https {
        let (_, port) = split_host_port(&options.https_address).map_err(|reason| {
            BuildError::InvalidHttpsAddress {
                address: options.https_address.clone(),
                reason,
            }
        })?;
        stages.push(Stage::HttpsRedirect {
            port: port.to_string(),
        });
    }

    let health = Stage::HealthCheck(HealthCheck::new(
        vec![options.ping_path.clone()],
        vec![options.ping_user_agent.clone()],
    ));

    if options.logging.silence_ping {
        stages.extend([health, Stage::RequestLogging]);
    } else {
        stages.extend([Stage::RequestLogging, health]);
    }

    Ok(Chain { stages })
}

/// Split `host:port`, `[v6]:port` or `:port` into its parts.
pub fn split_host_port(address: &str) -> Result<(&str, &str), String> {
    if let Some(rest) = address.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| "missing ']' in address".to_string())?;
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        if port.contains(':') {
            return Err("too many colons in address".to_string());
        }
        return Ok((&rest[..end], port));
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| "missing port in address".to_string())?;
    if host.contains(':') {
        return Err("too many colons in address".to_string());
    }
    if host.contains(['[', ']']) || port.contains(['[', ']']) {
        return Err("unexpected bracket in address".to_string());
    }
    Ok((host, port))
}
