//! Offline backfill: link legacy members to roster PersonIds by name.
//!
//! Scores every member without an external id against the current roster
//! snapshot, writes the confident links, and dumps everything else to a
//! CSV for manual review.
//!
//! Usage: cargo run --bin reconcile-ids -- [--snapshot roster.xml] [--dry-run]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parlwatch_common::Config;
use parlwatch_ingest::fetch::FeedClient;
use parlwatch_ingest::resolve::batch::{apply_links, write_review_report};
use parlwatch_ingest::resolve::BatchReconciler;
use parlwatch_ingest::sources::roster::parse_roster_xml;
use parlwatch_ingest::store::{IngestStore, PgStore};

#[derive(Parser)]
#[command(name = "reconcile-ids")]
#[command(about = "Backfill member PersonIds from a roster snapshot")]
struct Cli {
    /// Read the roster XML from a file instead of fetching it
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Plan and write the review report without linking anything
    #[arg(long)]
    dry_run: bool,

    /// Review report path (default: $DATA_DIR/reconcile/unmatched-<timestamp>.csv)
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("parlwatch=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let xml = match &cli.snapshot {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?,
        None => {
            let url = format!(
                "{}/Members/en/search/XML",
                config.ourcommons_base_url.trim_end_matches('/')
            );
            let client = FeedClient::new(Duration::from_millis(config.timeout_ms))?;
            client.get_text(&url).await?
        }
    };
    let snapshot = parse_roster_xml(&xml)?;
    let existing = store.load_entities().await?;
    info!(snapshot = snapshot.len(), members = existing.len(), "Loaded reconciliation inputs");

    let plan = BatchReconciler::new(&existing).plan(&snapshot);
    info!(
        links = plan.links.len(),
        review = plan.review.len(),
        already_linked = plan.already_linked,
        "Planned reconciliation"
    );

    let applied = if cli.dry_run {
        info!("Dry run, no links written");
        0
    } else {
        apply_links(&store, &plan.links).await
    };

    let report_path = cli.report.unwrap_or_else(|| {
        config
            .data_dir
            .join("reconcile")
            .join(format!("unmatched-{}.csv", Utc::now().format("%Y%m%dT%H%M%SZ")))
    });
    let rows = write_review_report(&plan.review, &report_path)?;

    info!(
        applied,
        review_rows = rows,
        report = %report_path.display(),
        "Reconciliation complete"
    );
    Ok(())
}
