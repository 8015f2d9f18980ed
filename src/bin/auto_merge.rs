// src/bin/auto_merge.rs
//
// Scheduled auto-merge sweep. Same as `dedupe auto-merge`, without the CLI tree,
// so a cron entry only needs the binary and its environment.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use dedupe_lib::matching::manager::DedupEngine;
use dedupe_lib::store::postgres::PgDedupStore;
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::dedup_config::DedupConfig;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about = "Auto-merge high-confidence duplicate listings", long_about = None)]
struct AutoMergeArgs {
    /// Minimum candidate score; defaults to DEDUP_AUTO_MERGE_THRESHOLD
    #[arg(long)]
    threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = AutoMergeArgs::parse();

    let config = DedupConfig::from_env();
    config.validate().context("Invalid deduplication configuration")?;
    config.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    let engine = DedupEngine::new(PgDedupStore::new(pool), config)
        .with_progress(ProgressConfig::from_env());

    let summary = engine
        .auto_merge_summary(args.threshold)
        .await
        .context("Auto-merge sweep failed")?;
    info!(
        "Auto-merge finished: {} merged, {} failed",
        summary.merged, summary.failed
    );
    Ok(())
}
