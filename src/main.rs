use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::time::Instant;

use dedupe_lib::matching::manager::DedupEngine;
use dedupe_lib::models::stats_models::DedupRunResult;
use dedupe_lib::store::postgres::PgDedupStore;
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::dedup_config::DedupConfig;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::platform_filter::PlatformFilterConfig;
use dedupe_lib::utils::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about = "Business-for-sale listing deduplication", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score, cluster and persist duplicates across every active listing
    Run,
    /// Only score pairs involving listings created in the last N days
    Recent {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// List persisted duplicate candidates of one listing
    Find {
        #[arg(long)]
        listing_id: String,
    },
    /// Merge the secondary listing into the primary one
    Merge {
        #[arg(long)]
        primary: String,
        #[arg(long)]
        secondary: String,
    },
    /// Merge pending candidates at or above the threshold
    AutoMerge {
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Mark a pending candidate pair as not a duplicate
    Reject {
        #[arg(long)]
        listing_a: String,
        #[arg(long)]
        listing_b: String,
        #[arg(long, default_value = "manual-review")]
        resolved_by: String,
    },
}

fn report_run(result: &DedupRunResult) -> Result<()> {
    info!(
        "Run finished: {} candidates, {} new groups, {} errors",
        result.candidates_found,
        result.groups_created,
        result.errors.len()
    );
    for error in &result.errors {
        warn!("  {}", error);
    }
    if result.has_fatal() {
        bail!("deduplication run aborted");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let cli = Cli::parse();
    let start = Instant::now();

    let config = DedupConfig::from_env();
    config.validate().context("Invalid deduplication configuration")?;
    config.log_config();

    let platform_filter = PlatformFilterConfig::from_env();
    platform_filter.log_config();

    let progress = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}",
        progress.enabled, progress.detailed
    );
    let show_db_stats = progress.should_show_db_connection_stats();

    let pool = connect().await.context("Failed to connect to database")?;
    platform_filter
        .validate_platforms(&pool)
        .await
        .context("Failed to validate platform filter")?;

    let engine = DedupEngine::new(PgDedupStore::new(pool.clone()), config)
        .with_platform_filter(platform_filter)
        .with_progress(progress);

    match cli.command {
        Command::Run => report_run(&engine.run_deduplication().await)?,
        Command::Recent { days } => report_run(&engine.run_recent_deduplication(days).await)?,
        Command::Find { listing_id } => {
            let candidates = engine
                .find_duplicates_for_listing(&listing_id)
                .await
                .context("Failed to look up duplicates")?;
            info!("{} candidate(s) for listing {}", candidates.len(), listing_id);
            for c in &candidates {
                let other = if c.listing_id_1 == listing_id {
                    &c.listing_id_2
                } else {
                    &c.listing_id_1
                };
                info!(
                    "  {} score={:.3} status={} matched={}",
                    other,
                    c.overall_score,
                    c.status,
                    c.matched_fields.join(",")
                );
            }
        }
        Command::Merge { primary, secondary } => {
            let outcome = engine
                .merge_duplicates(&primary, &secondary)
                .await
                .context("Merge failed")?;
            info!(
                "Merged {} into {}: group {}, {} sources moved, backfilled [{}]",
                outcome.secondary_id,
                outcome.primary_id,
                outcome.group_id,
                outcome.sources_reassigned,
                outcome.fields_backfilled.join(", ")
            );
        }
        Command::AutoMerge { threshold } => {
            let merged = engine
                .auto_merge_candidates(threshold)
                .await
                .context("Auto-merge sweep failed")?;
            info!("Auto-merge performed {} merge(s)", merged);
        }
        Command::Reject {
            listing_a,
            listing_b,
            resolved_by,
        } => {
            engine
                .reject_candidate(&listing_a, &listing_b, &resolved_by)
                .await
                .context("Reject failed")?;
        }
    }

    if show_db_stats {
        let (total, idle, in_use) = get_pool_status(&pool);
        info!("DB pool: {} total, {} idle, {} in use", total, idle, in_use);
    }
    info!("Done in {:.2?}", start.elapsed());
    Ok(())
}
