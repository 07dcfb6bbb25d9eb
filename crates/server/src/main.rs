//! Pigment server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pigment_core::config::AppConfig;
use pigment_server::backend::{Backend, ImageMagickBackend};
use pigment_server::plugin::PluginRegistry;
use pigment_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pigment - an image transformation proxy
#[derive(Parser, Debug)]
#[command(name = "pigment-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PIGMENT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
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

    tracing::info!("Pigment v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; PIGMENT_ variables can provide everything.
    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PIGMENT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    pigment_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let store = pigment_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(local = store.is_local(), "Source store initialized");

    let cache = pigment_cache::from_config(config.cache.as_ref())
        .await
        .context("failed to initialize cache")?;
    match &cache {
        Some(cache) => tracing::info!(
            root = %cache.root().display(),
            max_size = cache.max_size(),
            "Cache initialized"
        ),
        None => tracing::warn!("No cache configured, every request will be rendered"),
    }

    // Probing formats and identifying watermarks shells out.
    let backend_config = config.backend.clone();
    let watermarks = config.watermarks.clone();
    let backend = tokio::task::spawn_blocking(move || {
        ImageMagickBackend::new(&backend_config).load_watermarks(&watermarks)
    })
    .await
    .context("backend initialization panicked")?
    .context("failed to load watermarks")?;
    tracing::info!(watermarks = config.watermarks.len(), "ImageMagick backend initialized");
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let plugins = PluginRegistry::from_names(&config.plugins)
        .map_err(anyhow::Error::msg)
        .context("invalid plugin configuration")?;
    for name in &config.plugins {
        tracing::info!(plugin = %name, "Plugin registered");
    }

    if config.hmac.is_none() {
        tracing::warn!("No HMAC key configured, requests are not authenticated");
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, store, cache, backend, plugins)
        .context("failed to configure request signing")?;

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
