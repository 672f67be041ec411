use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use ig_gbp_sync::config;
use ig_gbp_sync::server::{self, AppState};
use ig_gbp_sync::sync::SyncPipeline;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pipeline = Arc::new(SyncPipeline::from_config(&cfg).await?);

    // Background poller; the push path runs inside the HTTP server.
    let scheduler = tokio::spawn(Arc::clone(&pipeline).run_scheduler(
        Duration::from_secs(cfg.app.poll_interval_secs),
        cfg.app.poll_limit,
        cfg.app.retention_days,
    ));

    let app = server::router(AppState {
        pipeline,
        app_secret: cfg.instagram.app_secret.clone(),
        verify_token: cfg.instagram.verify_token.clone(),
        default_poll_limit: cfg.app.poll_limit,
    });

    let addr: SocketAddr = cfg
        .app
        .bind_addr
        .parse()
        .context("app.bind_addr must be a socket address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, target_tag = %cfg.sync.target_tag, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
