use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use ig_gbp_sync::config;
use ig_gbp_sync::ledger::DEFAULT_PAGE_SIZE;
use ig_gbp_sync::sync::SyncPipeline;

#[derive(Parser, Debug)]
#[command(about = "Print sync ledger statistics and recent records")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// 1-based page of records, newest first
    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Drop records older than this many days before printing
    #[arg(long)]
    prune_days: Option<u32>,
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
    let pipeline = SyncPipeline::from_config(&cfg).await?;
    let ledger = pipeline.ledger();

    if let Some(days) = args.prune_days {
        let removed = ledger.prune(days, Utc::now()).await;
        println!("Pruned {removed} record(s) older than {days} day(s)");
    }

    let stats = ledger.stats().await;
    println!(
        "Records: {} (success {}, failed {}, skipped {})",
        stats.total, stats.success, stats.failed, stats.skipped
    );
    if let Some(at) = stats.last_synced_at {
        println!("Last record at: {}", at.to_rfc3339());
    }
    match pipeline.cursor().peek().await? {
        Some(cursor) => println!(
            "Cursor: last poll {} (processed {}, synced {})",
            cursor.last_poll_at.to_rfc3339(),
            cursor.total_processed,
            cursor.total_synced
        ),
        None => println!("Cursor: not started"),
    }

    let page = ledger.page(args.page, args.page_size).await;
    println!("Page {}/{}:", page.page, page.total_pages.max(1));
    for r in page.records {
        println!(
            "  {} {:<7} post={} listing={} {}",
            r.timestamp.to_rfc3339(),
            r.status.as_str(),
            r.post_id,
            r.listing_id.as_deref().unwrap_or("-"),
            r.error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
