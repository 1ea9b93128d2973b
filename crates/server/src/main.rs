//! peercache node binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use peercache_core::AppConfig;
use peercache_server::{AccessPolicy, AppState, create_router};
use peercache_storage::CacheStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// peercache - distributed content-addressed file cache node
#[derive(Parser, Debug)]
#[command(name = "peercached")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PEERCACHE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file merged with `PEERCACHE_`
/// environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::warn!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PEERCACHE_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("peercache v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    peercache_server::metrics::register_metrics();

    let store = CacheStore::new(&config.cache.path)
        .await
        .with_context(|| format!("failed to open cache at {}", config.cache.path.display()))?;
    tracing::info!(path = %config.cache.path.display(), "Cache store ready");

    let policy = AccessPolicy::from_config(&config)
        .await
        .context("failed to build access policy")?;

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let label = config.server.label.clone();
    let peer_count = config.peers.len();

    let state = AppState::new(config, Arc::new(store), policy)
        .context("failed to initialize node state")?;
    let background = state.spawn_background();
    tracing::info!(label = %label, peers = peer_count, "Peer monitors started");

    let app = create_router(state.clone());

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    let closing = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        closing.close();
    })
    .await?;

    // Stops monitors and rotation even when serve returned on its own
    state.close();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
}
