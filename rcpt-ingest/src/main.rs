//! rcpt-ingest - PDF receipt ingestion service
//!
//! Accepts PDF uploads, validates and processes them through the Gemini
//! extraction adapter, and files processed receipts under
//! `<root>/receipts/<year>/<category>/`.

use anyhow::{Context, Result};
use clap::Parser;
use rcpt_common::config::load_toml_config;
use rcpt_common::db::{init_database, Store};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rcpt_ingest::config::{log_filter, Args, ServiceConfig};
use rcpt_ingest::services::{GeminiExtractor, ReceiptLifecycle, StagingArea};
use rcpt_ingest::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config =
        load_toml_config(args.config.as_deref()).context("Failed to load config file")?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(log_filter(&toml_config)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting rcpt-ingest (Receipt Ingest) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("RCPT_REVISION"),
        env!("RCPT_BUILT_AT"),
        env!("RCPT_PROFILE"),
    );

    // Missing API key is fatal
    let config = ServiceConfig::resolve(&args, &toml_config).map_err(|e| {
        error!("{}", e);
        anyhow::anyhow!(e)
    })?;
    info!(?config, "Configuration resolved");

    config
        .layout
        .ensure_directories()
        .context("Failed to initialize root folder")?;

    let db_path = config.layout.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database connection established");

    let staging = StagingArea::from_layout(&config.layout);
    if config.purge_staging_on_start {
        match staging.purge_staging().await {
            Ok(removed) => info!(removed, "Staging area purged at startup"),
            Err(e) => warn!(error = %e, "Staging purge failed"),
        }
    }

    let extractor = GeminiExtractor::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.gemini_base_url.clone(),
    )
    .context("Failed to build Gemini client")?;
    info!(model = extractor.model(), "Extraction adapter ready");

    let lifecycle = ReceiptLifecycle::new(Store::new(pool), staging, Arc::new(extractor));
    let app = rcpt_ingest::build_router(AppState::new(Arc::new(lifecycle)), config.max_upload_bytes);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
