//! Host-routed set of provider bundles with atomic reload.
//!
//! Each reload builds a complete new map of bundles and swaps it in with one
//! store. A request sees either the old set or the new one, never a mix, and
//! a reload that fails keeps serving the previous set.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tower_http::trace::TraceLayer;
use warden_config::ProviderRecord;

use crate::bundle::{BuildContext, ProviderBundle};
use crate::error::Result;
use crate::middleware::strip_port;
use crate::proxy::FORWARDED_HOST_HEADER;

/// Bundles keyed by lowercase `host[:port]`.
pub type BundleMap = HashMap<String, Arc<ProviderBundle>>;

/// Outcome of a successful reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    /// Incremented on every successful reload.
    pub generation: u64,
    /// Providers now being served.
    pub loaded: Vec<String>,
    /// Providers skipped or shadowed by a later record for the same host.
    pub skipped: Vec<String>,
}

/// Provider bundles served by host.
pub struct ProviderRegistry {
    ctx: BuildContext,
    bundles: ArcSwap<BundleMap>,
    reload_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new(ctx: BuildContext) -> Self {
        Self {
            ctx,
            bundles: ArcSwap::from_pointee(BundleMap::new()),
            reload_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Rebuild every bundle from `records` and swap the new set in.
    ///
    /// Providers with an unusable external host are skipped. A fatal error
    /// aborts the reload and leaves the current bundles untouched.
    pub fn reload(&self, records: &[ProviderRecord]) -> Result<ReloadReport> {
        let _guard = self.reload_lock.lock();

        let mut bundles = BundleMap::with_capacity(records.len());
        let mut skipped = Vec::new();

        for record in records {
            match ProviderBundle::build(record, &self.ctx) {
                Ok(bundle) => {
                    let host = bundle.host().to_string();
                    if let Some(previous) = bundles.insert(host.clone(), Arc::new(bundle)) {
                        tracing::warn!(
                            host = %host,
                            provider = %record.name,
                            replaced = %previous.name(),
                            "Duplicate external host, later provider wins"
                        );
                        skipped.push(previous.name().to_string());
                    }
                }
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(provider = %record.name, error = %e, "Skipping provider");
                    skipped.push(record.name.clone());
                }
                Err(e) => {
                    tracing::error!(provider = %record.name, error = %e, "Reload aborted");
                    return Err(e);
                }
            }
        }

        let mut loaded: Vec<String> = bundles.values().map(|b| b.name().to_string()).collect();
        loaded.sort();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.bundles.store(Arc::new(bundles));

        tracing::info!(
            generation,
            loaded = loaded.len(),
            skipped = skipped.len(),
            "Providers reloaded"
        );

        Ok(ReloadReport {
            generation,
            loaded,
            skipped,
        })
    }

    /// Find the bundle serving `host`.
    pub fn get(&self, host: &str) -> Option<Arc<ProviderBundle>> {
        let bundles = self.bundles.load();
        lookup_exact(&bundles, host).or_else(|| lookup_domain(&bundles, host))
    }

    /// Current bundle set.
    pub fn snapshot(&self) -> Arc<BundleMap> {
        self.bundles.load_full()
    }

    /// Number of bundles being served.
    pub fn len(&self) -> usize {
        self.bundles.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.load().is_empty()
    }

    /// Generation of the current bundle set; 0 before the first reload.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Resolve the bundle for a request.
    ///
    /// `Host` is tried first, then `X-Forwarded-Host`; exact hosts win over
    /// forward-domain cookie domains.
    pub fn route(&self, headers: &HeaderMap) -> Option<Arc<ProviderBundle>> {
        let candidates: Vec<&str> = [header::HOST.as_str(), FORWARDED_HOST_HEADER]
            .into_iter()
            .filter_map(|name| headers.get(name).and_then(|v| v.to_str().ok()))
            .collect();

        let bundles = self.bundles.load();
        candidates
            .iter()
            .find_map(|host| lookup_exact(&bundles, host))
            .or_else(|| {
                candidates
                    .iter()
                    .find_map(|host| lookup_domain(&bundles, host))
            })
    }

    /// Build the axum router dispatching every request by host.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }
}

async fn dispatch(State(registry): State<Arc<ProviderRegistry>>, request: Request) -> Response {
    let Some(bundle) = registry.route(request.headers()) else {
        tracing::debug!(
            host = ?request.headers().get(header::HOST),
            path = %request.uri().path(),
            "No provider for host"
        );
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    bundle.serve(request).await
}

fn lookup_exact(bundles: &BundleMap, host: &str) -> Option<Arc<ProviderBundle>> {
    let host = host.trim().to_ascii_lowercase();
    bundles
        .get(&host)
        .or_else(|| bundles.get(strip_port(&host)))
        .cloned()
}

/// Forward-domain bundle whose cookie domain covers `host`, most specific first.
fn lookup_domain(bundles: &BundleMap, host: &str) -> Option<Arc<ProviderBundle>> {
    let host = host.trim().to_ascii_lowercase();
    let name = strip_port(&host);

    bundles
        .values()
        .filter_map(|bundle| {
            let domain = bundle.cookie_domain()?.trim_start_matches('.');
            let covers = name == domain || name.ends_with(&format!(".{}", domain));
            covers.then_some((domain.len(), bundle))
        })
        .min_by_key(|(len, bundle)| (Reverse(*len), bundle.name().to_string()))
        .map(|(_, bundle)| bundle.clone())
}
