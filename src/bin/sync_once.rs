use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use ig_gbp_sync::config;
use ig_gbp_sync::sync::SyncPipeline;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run a single poll cycle against Instagram and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Maximum number of recent posts to fetch (1-100, defaults to app.poll_limit)
    #[arg(long)]
    limit: Option<u32>,

    /// Report what would be synced without publishing or recording anything
    #[arg(long)]
    dry_run: bool,
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

    let pipeline = SyncPipeline::from_config(&cfg).await?;
    let limit = args.limit.unwrap_or(cfg.app.poll_limit).clamp(1, 100);

    info!(limit, dry_run = args.dry_run, "starting one-shot poll");
    let report = pipeline.run_poll(limit, args.dry_run).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
