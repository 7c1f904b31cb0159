use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browserless_client::BrowserlessClient;
use parlwatch_common::Config;
use parlwatch_ingest::fetch::FeedClient;
use parlwatch_ingest::observe::{ErrorReporter, TracingTelemetry, WebhookReporter};
use parlwatch_ingest::orchestrator::{FeedSource, FetchOptions, FetchOrchestrator, RunReport};
use parlwatch_ingest::roster::RosterReconciler;
use parlwatch_ingest::sources::expenses::ReportingPeriod;
use parlwatch_ingest::sources::{
    BillsSource, ExpensesSource, MemberDetailFetcher, PetitionsSource, RosterSource, VotesSource,
};
use parlwatch_ingest::store::PgStore;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Ingest House of Commons feeds into Postgres")]
struct Cli {
    /// Feed to ingest
    #[arg(value_enum)]
    source: SourceArg,

    /// Cap the roster and skip departures, regardless of DRY_RUN
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Roster,
    Votes,
    Bills,
    Expenses,
    Petitions,
    /// Roster first, then every dependent feed
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every requested run succeeded.
async fn run() -> Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("parlwatch=info".parse()?)
                .add_directive("telemetry=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    config.dry_run |= cli.dry_run;
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let ctx = Ingest::new(config, store)?;

    let targets = match cli.source {
        SourceArg::All => vec![
            SourceArg::Roster,
            SourceArg::Votes,
            SourceArg::Bills,
            SourceArg::Expenses,
            SourceArg::Petitions,
        ],
        one => vec![one],
    };

    let mut reports = Vec::new();
    for target in targets {
        if cli.source == SourceArg::All && target == SourceArg::Expenses && !ctx.expenses_configured() {
            warn!("EXPENSES_CSV_URL not set, skipping expenses");
            continue;
        }
        reports.push(ctx.run(target).await?);
    }

    for report in &reports {
        info!(
            source = report.source.as_str(),
            success = report.success,
            anomalies = report.anomalies.len(),
            "{}",
            report.message
        );
    }
    Ok(reports.iter().all(|r| r.success))
}

struct Ingest {
    config: Config,
    store: Arc<PgStore>,
    client: FeedClient,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl Ingest {
    fn new(config: Config, store: Arc<PgStore>) -> Result<Self> {
        let client = FeedClient::new(Duration::from_millis(config.timeout_ms))?;
        let reporter = match &config.error_webhook_url {
            Some(url) => {
                info!("Error webhook enabled");
                Some(Arc::new(WebhookReporter::new(url.clone())) as Arc<dyn ErrorReporter>)
            }
            None => {
                info!("No ERROR_WEBHOOK_URL set, failure reports disabled");
                None
            }
        };
        Ok(Self {
            config,
            store,
            client,
            reporter,
        })
    }

    fn expenses_configured(&self) -> bool {
        self.config.expenses_csv_url.is_some()
    }

    async fn run(&self, target: SourceArg) -> Result<RunReport> {
        let base = self.config.ourcommons_base_url.as_str();
        let report = match target {
            SourceArg::Roster => self.orchestrate(self.roster_source()).await,
            SourceArg::Votes => {
                let session = self.config.parliament_and_session()?;
                let source = VotesSource::new(
                    self.client.clone(),
                    self.store.clone(),
                    base,
                    session,
                    self.config.votes_limit,
                );
                self.orchestrate(source).await
            }
            SourceArg::Bills => {
                let source = BillsSource::new(
                    self.client.clone(),
                    self.store.clone(),
                    &self.config.legisinfo_base_url,
                    &self.config.parliament_session,
                );
                self.orchestrate(source).await
            }
            SourceArg::Expenses => self.orchestrate(self.expenses_source()?).await,
            SourceArg::Petitions => {
                let source = PetitionsSource::new(
                    self.client.clone(),
                    self.store.clone(),
                    &self.config.petitions_feed_url,
                );
                self.orchestrate(source).await
            }
            SourceArg::All => anyhow::bail!("`all` is expanded before dispatch"),
        };
        Ok(report)
    }

    async fn orchestrate<S: FeedSource>(&self, source: S) -> RunReport {
        FetchOrchestrator::new(source, FetchOptions::from_config(&self.config), self.store.clone())
            .with_telemetry(Arc::new(TracingTelemetry))
            .with_error_reporter(self.reporter.clone())
            .run()
            .await
    }

    fn roster_source(&self) -> RosterSource {
        let config = &self.config;
        let limit = config.dry_run.then_some(config.dry_run_limit);
        let mut source = RosterSource::new(
            self.client.clone(),
            self.store.clone(),
            &config.ourcommons_base_url,
            RosterReconciler::new(limit),
        );
        if config.fetch_member_details {
            source = source.with_member_details(MemberDetailFetcher::new(
                self.client.clone(),
                &config.ourcommons_base_url,
            ));
        }
        if let Some(url) = &config.browserless_url {
            info!("Browserless fallback enabled");
            source = source.with_browserless(BrowserlessClient::new(
                url,
                config.browserless_token.as_deref(),
                Duration::from_millis(config.timeout_ms),
            ));
        }
        source
    }

    fn expenses_source(&self) -> Result<ExpensesSource> {
        let config = &self.config;
        let url = config
            .expenses_csv_url
            .as_deref()
            .context("EXPENSES_CSV_URL is required for the expenses feed")?;
        let period = ReportingPeriod {
            fiscal_year: config
                .expenses_fiscal_year
                .context("EXPENSES_FISCAL_YEAR is required for the expenses feed")?,
            quarter: config
                .expenses_quarter
                .context("EXPENSES_QUARTER is required for the expenses feed")?,
        };
        Ok(ExpensesSource::new(self.client.clone(), self.store.clone(), url, period))
    }
}
