//! Per-source ingestion runs.
//!
//! One `FetchOrchestrator` drives one `FeedSource` through
//! extract (retry, then fallback) → prepare → validate → persist →
//! flag anomalies → cleanup. Stages run strictly in sequence. Nothing
//! escapes `run`: every failure ends up in the returned `RunReport` and,
//! when it matters, as a classified anomaly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use parlwatch_common::{Anomaly, Config, PersistStats, ScrapeResult, Severity, ValidationOutcome};

use crate::classify::classify;
use crate::observe::{ErrorReporter, IngestEvent, NoopTelemetry, Telemetry};
use crate::store::AnomalySink;

/// Normalized, resolved records ready for validation and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch<T> {
    pub records: Vec<T>,
    /// Descriptions of records dropped while preparing, e.g. for an
    /// unresolved mandatory member reference.
    pub dropped: Vec<String>,
    /// Records intentionally left out (dry-run cap).
    pub skipped: u64,
}

impl<T> PreparedBatch<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            dropped: Vec::new(),
            skipped: 0,
        }
    }
}

/// One upstream feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Feed-native record as parsed.
    type Record: Send + 'static;
    /// Record after normalization and entity resolution.
    type Resolved: Send + Sync + 'static;

    /// Short identifier used as the anomaly `source_component`.
    fn name(&self) -> &str;

    fn source_url(&self) -> String;

    async fn primary_extract(&self) -> ScrapeResult<Vec<Self::Record>>;

    /// Secondary extraction path, tried once after the primary is exhausted.
    async fn fallback_extract(&self) -> ScrapeResult<Vec<Self::Record>> {
        ScrapeResult::failed(format!("{} has no fallback extraction", self.name()), None)
    }

    async fn prepare(&self, records: Vec<Self::Record>) -> anyhow::Result<PreparedBatch<Self::Resolved>>;

    fn validate(&self, batch: &PreparedBatch<Self::Resolved>) -> ValidationOutcome;

    /// Upsert every record. Per-record failures are counted, not returned.
    async fn persist(&self, batch: PreparedBatch<Self::Resolved>) -> PersistStats;

    /// Release per-run resources. Called after every run, successful or not.
    async fn cleanup(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, base: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            RetryPolicy::Linear => base.saturating_mul(attempt),
            RetryPolicy::Exponential => {
                base.saturating_mul(2u32.saturating_pow(attempt - 1))
            }
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct FetchOptions {
    #[builder(default = 3)]
    pub max_retries: u32,
    #[builder(default = Duration::from_millis(5000))]
    pub retry_delay: Duration,
    /// Bound on each individual extraction attempt.
    #[builder(default = Duration::from_millis(30000))]
    pub timeout: Duration,
    #[builder(default = RetryPolicy::Linear)]
    pub retry_policy: RetryPolicy,
    #[builder(default = true)]
    pub use_fallback: bool,
    #[builder(default, setter(strip_option, into))]
    pub external_job_id: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self::builder()
            .max_retries(config.max_retries)
            .retry_delay(Duration::from_millis(config.retry_delay_ms))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
    }
}

/// Where a run currently is. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    AttemptingPrimary(u32),
    Fallback,
    Failure,
    Prepare,
    Validate,
    Persist,
    FlagAnomalies,
    Cleanup,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::AttemptingPrimary(n) => write!(f, "attempting_primary({n})"),
            RunPhase::Fallback => write!(f, "fallback"),
            RunPhase::Failure => write!(f, "failure"),
            RunPhase::Prepare => write!(f, "prepare"),
            RunPhase::Validate => write!(f, "validate"),
            RunPhase::Persist => write!(f, "persist"),
            RunPhase::FlagAnomalies => write!(f, "flag_anomalies"),
            RunPhase::Cleanup => write!(f, "cleanup"),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: String,
    pub success: bool,
    pub message: String,
    pub primary_attempts: u32,
    pub used_fallback: bool,
    /// Where the extracted records came from, as reported by the attempt that succeeded.
    pub source_url: Option<String>,
    pub records_extracted: usize,
    pub stats: PersistStats,
    /// Anomalies flagged during this run, in the order they were recorded.
    pub anomalies: Vec<Anomaly>,
}

/// Extraction outcome including how it was reached.
struct Scrape<T> {
    result: ScrapeResult<Vec<T>>,
    primary_attempts: u32,
    used_fallback: bool,
}

pub struct FetchOrchestrator<S: FeedSource> {
    source: S,
    options: FetchOptions,
    anomalies: Arc<dyn AnomalySink>,
    telemetry: Arc<dyn Telemetry>,
    error_reporter: Option<Arc<dyn ErrorReporter>>,
}

impl<S: FeedSource> FetchOrchestrator<S> {
    pub fn new(source: S, options: FetchOptions, anomalies: Arc<dyn AnomalySink>) -> Self {
        Self {
            source,
            options,
            anomalies,
            telemetry: Arc::new(NoopTelemetry),
            error_reporter: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Option<Arc<dyn ErrorReporter>>) -> Self {
        self.error_reporter = reporter;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn enter(&self, phase: RunPhase) {
        debug!(source = self.source.name(), phase = %phase, "Run phase");
    }

    /// Run the full pipeline once. Cleanup always runs.
    pub async fn run(&self) -> RunReport {
        let name = self.source.name().to_string();
        info!(source = name.as_str(), url = %self.source.source_url(), "Starting ingestion run");
        self.enter(RunPhase::Idle);

        let report = self.execute().await;

        self.enter(RunPhase::Cleanup);
        self.source.cleanup().await;
        self.enter(RunPhase::Done);

        self.telemetry.emit(IngestEvent::RunCompleted {
            source: name.clone(),
            success: report.success,
            stats: report.stats.clone(),
        });

        if report.success {
            info!(
                source = name.as_str(),
                attempts = report.primary_attempts,
                fallback = report.used_fallback,
                anomalies = report.anomalies.len(),
                "{}",
                report.message
            );
        } else {
            error!(source = name.as_str(), "{}", report.message);
            if let Some(reporter) = &self.error_reporter {
                let severity = report
                    .anomalies
                    .iter()
                    .map(|a| a.severity)
                    .max()
                    .unwrap_or(Severity::Critical);
                if let Err(e) = reporter.report(&name, severity, &report.message).await {
                    warn!(source = name.as_str(), error = %e, "Failed to report run failure");
                }
            }
        }

        report
    }

    async fn execute(&self) -> RunReport {
        let name = self.source.name().to_string();
        let mut report = RunReport {
            source: name.clone(),
            success: false,
            message: String::new(),
            primary_attempts: 0,
            used_fallback: false,
            source_url: None,
            records_extracted: 0,
            stats: PersistStats::default(),
            anomalies: Vec::new(),
        };

        let scrape = self.scrape().await;
        report.primary_attempts = scrape.primary_attempts;
        report.used_fallback = scrape.used_fallback;
        report.source_url = scrape.result.source_url.clone();

        if !scrape.result.success {
            self.enter(RunPhase::Failure);
            let fallback_note = if scrape.used_fallback { " and the fallback" } else { "" };
            let description = format!(
                "Retry exhausted: {name} extraction gave up after {} primary attempts{fallback_note}",
                scrape.primary_attempts
            );
            self.flag(&description, &mut report).await;
            report.message = format!("{description}. Last error: {}", scrape.result.error_message());
            return report;
        }

        if scrape.used_fallback {
            let description = format!(
                "Primary extraction for {name} recovered via fallback after {} attempts",
                scrape.primary_attempts
            );
            self.flag(&description, &mut report).await;
        }

        let records = scrape.result.data.unwrap_or_default();
        report.records_extracted = records.len();

        self.enter(RunPhase::Prepare);
        let batch = match self.source.prepare(records).await {
            Ok(batch) => batch,
            Err(e) => {
                let description = format!("Prepare failed for {name}: {e:#}");
                self.flag(&description, &mut report).await;
                report.message = description;
                return report;
            }
        };

        self.enter(RunPhase::Validate);
        let outcome = self.source.validate(&batch);
        if !outcome.is_valid {
            warn!(
                source = name.as_str(),
                anomalies = outcome.anomalies.len(),
                "Batch failed validation, persisting anyway"
            );
        }

        self.enter(RunPhase::Persist);
        let skipped = batch.skipped;
        report.stats = self.source.persist(batch).await;
        report.stats.skipped = skipped;

        self.enter(RunPhase::FlagAnomalies);
        for description in &outcome.anomalies {
            self.flag(description, &mut report).await;
        }

        report.success = true;
        report.message = format!(
            "{name}: {} records extracted, {}",
            report.records_extracted, report.stats
        );
        report
    }

    /// Primary extraction with retries, then at most one fallback attempt.
    async fn scrape(&self) -> Scrape<S::Record> {
        let name = self.source.name();
        let opts = &self.options;
        let mut last_error = "no extraction attempted".to_string();

        for attempt in 1..=opts.max_retries {
            self.enter(RunPhase::AttemptingPrimary(attempt));
            match self.bounded(self.source.primary_extract(), "Primary extraction").await {
                Ok(result) => {
                    info!(source = name, attempt, "Primary extraction succeeded");
                    return Scrape {
                        result,
                        primary_attempts: attempt,
                        used_fallback: false,
                    };
                }
                Err(e) => {
                    warn!(source = name, attempt, max = opts.max_retries, error = e.as_str(), "Primary extraction failed");
                    self.telemetry.emit(IngestEvent::AttemptFailed {
                        source: name.to_string(),
                        attempt,
                        error: e.clone(),
                    });
                    last_error = e;
                }
            }
            if attempt < opts.max_retries {
                let delay = opts.retry_policy.delay_for(opts.retry_delay, attempt);
                debug!(source = name, delay_ms = delay.as_millis() as u64, "Waiting before retry");
                tokio::time::sleep(delay).await;
            }
        }

        let primary_attempts = opts.max_retries;
        if !opts.use_fallback {
            return Scrape {
                result: ScrapeResult::failed(last_error, Some(self.source.source_url())),
                primary_attempts,
                used_fallback: false,
            };
        }

        self.enter(RunPhase::Fallback);
        info!(source = name, "Primary extraction exhausted, trying fallback");
        let fallback = self.bounded(self.source.fallback_extract(), "Fallback extraction").await;
        self.telemetry.emit(IngestEvent::FallbackUsed {
            source: name.to_string(),
            success: fallback.is_ok(),
        });

        let result = match fallback {
            Ok(result) => {
                info!(
                    source = name,
                    records = result.data.as_ref().map_or(0, Vec::len),
                    "Fallback extraction succeeded"
                );
                result
            }
            Err(e) => {
                error!(source = name, error = e.as_str(), "Fallback extraction failed");
                ScrapeResult::failed(e, Some(self.source.source_url()))
            }
        };
        Scrape {
            result,
            primary_attempts,
            used_fallback: true,
        }
    }

    /// Run one extraction attempt under the per-attempt timeout. A successful
    /// result keeps the attempt's own `source_url`.
    async fn bounded<F>(&self, attempt: F, label: &str) -> Result<ScrapeResult<Vec<S::Record>>, String>
    where
        F: Future<Output = ScrapeResult<Vec<S::Record>>>,
    {
        match tokio::time::timeout(self.options.timeout, attempt).await {
            Ok(mut result) if result.success => {
                result.data.get_or_insert_with(Vec::new);
                Ok(result)
            }
            Ok(result) => Err(result.error_message().to_string()),
            Err(_) => Err(format!(
                "{label} timed out after {}ms",
                self.options.timeout.as_millis()
            )),
        }
    }

    /// Classify a description and append it to the anomaly sink.
    async fn flag(&self, description: &str, report: &mut RunReport) {
        let classification = classify(description);
        let anomaly = Anomaly::new(
            self.source.name(),
            self.options.external_job_id.clone(),
            classification.category,
            classification.severity,
            description.to_string(),
        );

        warn!(
            source = self.source.name(),
            severity = %anomaly.severity,
            category = %anomaly.category,
            rule = classification.rule,
            description,
            "Flagging anomaly"
        );
        if let Err(e) = self.anomalies.record(&anomaly).await {
            error!(source = self.source.name(), error = %e, "Failed to record anomaly");
        }
        self.telemetry.emit(IngestEvent::AnomalyFlagged {
            source: self.source.name().to_string(),
            severity: anomaly.severity,
            description: description.to_string(),
        });
        report.anomalies.push(anomaly);
    }
}

/// Retry an async operation with the given policy. Returns the last error
/// once `attempts` tries have failed.
pub async fn retry_with<T, F, Fut>(
    policy: RetryPolicy,
    base_delay: Duration,
    attempts: u32,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(base_delay, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_delays_grow_by_attempt() {
        let base = Duration::from_millis(5000);
        assert_eq!(RetryPolicy::Linear.delay_for(base, 1), Duration::from_millis(5000));
        assert_eq!(RetryPolicy::Linear.delay_for(base, 2), Duration::from_millis(10000));
        assert_eq!(RetryPolicy::Linear.delay_for(base, 3), Duration::from_millis(15000));
    }

    #[test]
    fn exponential_delays_double() {
        let base = Duration::from_secs(1);
        let delays: Vec<_> = (1..=3).map(|n| RetryPolicy::Exponential.delay_for(base, n)).collect();
        assert_eq!(
            delays,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn default_options() {
        let opts = FetchOptions::default();
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.retry_delay, Duration::from_millis(5000));
        assert_eq!(opts.timeout, Duration::from_millis(30000));
        assert!(opts.use_fallback);
        assert!(opts.external_job_id.is_none());
    }

    #[tokio::test]
    async fn retry_with_stops_at_first_success() {
        let mut calls = 0;
        let value = retry_with(RetryPolicy::Exponential, Duration::ZERO, 4, |attempt| {
            calls += 1;
            async move {
                if attempt < 3 {
                    anyhow::bail!("attempt {attempt} failed")
                }
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_with_returns_last_error() {
        let err = retry_with(RetryPolicy::Linear, Duration::ZERO, 2, |attempt| async move {
            Err::<(), _>(anyhow::anyhow!("attempt {attempt} failed"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "attempt 2 failed");
    }
}
