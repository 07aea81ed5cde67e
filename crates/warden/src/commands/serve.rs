//! Serve command - runs the proxy for every configured provider.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use warden_proxy::{ProviderRegistry, ReloadReport};

use super::{Context, SourceArgs};

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    pub listen: Option<String>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, _ctx: &Context) -> Result<()> {
    let config = args.sources.load_config()?;
    let providers = args.sources.load_providers()?;

    let registry = Arc::new(ProviderRegistry::new(args.sources.build_context(&config)));
    let report = registry
        .reload(&providers)
        .context("refusing to serve with an invalid configuration")?;

    for name in &report.skipped {
        warn!(provider = %name, "Provider not served");
    }
    if report.loaded.is_empty() {
        warn!("No providers loaded; every request will be answered with 404");
    }

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        providers = report.loaded.len(),
        "Starting Warden"
    );

    let (stop_tx, stop_rx) = oneshot::channel();

    #[cfg(unix)]
    let reload = tokio::spawn(reload_on_hangup(
        registry.clone(),
        args.sources.clone(),
        stop_tx,
    ));
    #[cfg(not(unix))]
    drop(stop_tx);

    axum::serve(listener, registry.router())
        .with_graceful_shutdown(shutdown_signal(stop_rx))
        .await
        .context("server error")?;

    // A fatal reload has already returned by the time the server drains.
    #[cfg(unix)]
    {
        reload.abort();
        if let Ok(Err(e)) = reload.await {
            return Err(e);
        }
    }

    info!("Warden stopped");
    Ok(())
}

/// Rebuild all providers whenever SIGHUP arrives.
///
/// Only the provider records are reread; the baseline options from the
/// config file stay as loaded at startup. An unreadable providers file keeps
/// the current set. A configuration that builds with a fatal error stops the
/// server through `stop` and is returned, as it would be at startup.
#[cfg(unix)]
async fn reload_on_hangup(
    registry: Arc<ProviderRegistry>,
    sources: SourceArgs,
    stop: oneshot::Sender<()>,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGHUP, reload disabled");
            return Ok(());
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading providers");

        if let Err(e) = reload_providers(&registry, &sources) {
            error!(error = %format!("{:#}", e), "Fatal configuration error during reload, shutting down");
            let _ = stop.send(());
            return Err(e);
        }
    }
    Ok(())
}

/// Reread the provider records and swap them in.
///
/// Returns `Ok(None)` when the records cannot be read and the current set is
/// kept. Fatal build errors are returned.
fn reload_providers(registry: &ProviderRegistry, sources: &SourceArgs) -> Result<Option<ReloadReport>> {
    let providers = match sources.load_providers() {
        Ok(providers) => providers,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Reload failed, keeping current providers");
            return Ok(None);
        }
    };

    let report = registry.reload(&providers).context("reloading providers")?;
    info!(
        generation = report.generation,
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        "Reload complete"
    );
    Ok(Some(report))
}

/// Resolves on Ctrl+C, SIGTERM, or a fatal reload.
async fn shutdown_signal(stop: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        // A dropped sender means reload is unavailable, not a stop request.
        Ok(()) = stop => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn provider(name: &str, cookie_secret: &str) -> String {
        format!(
            r#"{{
                "name": "{name}",
                "external_host": "https://{name}.example.com",
                "internal_host": "http://{name}.internal:8080",
                "client_id": "id",
                "client_secret": "secret",
                "cookie_secret": "{cookie_secret}",
                "mode": "proxy",
                "oidc_configuration": {{
                    "issuer": "https://sso.example.com/",
                    "authorization_endpoint": "https://sso.example.com/authorize",
                    "token_endpoint": "https://sso.example.com/token",
                    "jwks_uri": "https://sso.example.com/jwks",
                    "userinfo_endpoint": "https://sso.example.com/userinfo"
                }}
            }}"#
        )
    }

    fn setup(dir: &TempDir, providers: &[String]) -> (ProviderRegistry, SourceArgs) {
        let config = dir.path().join("warden.toml");
        fs::write(&config, "[options]\nping_path = \"/healthz\"\n").unwrap();
        let providers_path = dir.path().join("providers.json");
        fs::write(&providers_path, format!("[{}]", providers.join(","))).unwrap();
        let sources = SourceArgs {
            config,
            providers: providers_path,
            certs: PathBuf::from(dir.path()),
        };
        let registry = ProviderRegistry::new(sources.build_context(&sources.load_config().unwrap()));
        registry.reload(&sources.load_providers().unwrap()).unwrap();
        (registry, sources)
    }

    #[test]
    fn test_reload_picks_up_new_providers() {
        let dir = TempDir::new().unwrap();
        let (registry, sources) = setup(&dir, &[provider("wiki", "0123456789abcdef")]);

        fs::write(
            &sources.providers,
            format!(
                "[{},{}]",
                provider("wiki", "0123456789abcdef"),
                provider("grafana", "0123456789abcdef")
            ),
        )
        .unwrap();

        let report = reload_providers(&registry, &sources).unwrap().unwrap();
        assert_eq!(report.loaded, vec!["grafana", "wiki"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unreadable_providers_keep_current_set() {
        let dir = TempDir::new().unwrap();
        let (registry, sources) = setup(&dir, &[provider("wiki", "0123456789abcdef")]);

        fs::write(&sources.providers, "not json").unwrap();

        assert!(reload_providers(&registry, &sources).unwrap().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fatal_reload_is_returned() {
        let dir = TempDir::new().unwrap();
        let (registry, sources) = setup(&dir, &[provider("wiki", "0123456789abcdef")]);

        fs::write(&sources.providers, format!("[{}]", provider("wiki", "short"))).unwrap();

        let err = reload_providers(&registry, &sources).unwrap_err();
        assert!(format!("{:#}", err).contains("reloading providers"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_shuts_down() {
        let (tx, rx) = oneshot::channel();
        let shutdown = tokio::spawn(shutdown_signal(rx));
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_keeps_serving() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);

        let shutdown = tokio::time::timeout(Duration::from_millis(100), shutdown_signal(rx)).await;
        assert!(shutdown.is_err());
    }
}
