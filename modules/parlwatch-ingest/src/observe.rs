//! Observability port and error reporting.
//!
//! The orchestrator emits `IngestEvent`s through an injected `Telemetry`
//! implementation and forwards run-level failures to an optional
//! `ErrorReporter`. Neither is allowed to fail a run.

use std::fmt;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use parlwatch_common::{PersistStats, Severity};

/// One observable step of an ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    AttemptFailed {
        source: String,
        attempt: u32,
        error: String,
    },
    FallbackUsed {
        source: String,
        success: bool,
    },
    AnomalyFlagged {
        source: String,
        severity: Severity,
        description: String,
    },
    RunCompleted {
        source: String,
        success: bool,
        stats: PersistStats,
    },
}

impl IngestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IngestEvent::AttemptFailed { .. } => "attempt_failed",
            IngestEvent::FallbackUsed { .. } => "fallback_used",
            IngestEvent::AnomalyFlagged { .. } => "anomaly_flagged",
            IngestEvent::RunCompleted { .. } => "run_completed",
        }
    }
}

impl fmt::Display for IngestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Telemetry: Send + Sync {
    fn emit(&self, event: IngestEvent);
}

/// Discards every event.
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn emit(&self, _event: IngestEvent) {}
}

/// Writes events as structured `tracing` records under the `telemetry` target.
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn emit(&self, event: IngestEvent) {
        match &event {
            IngestEvent::AttemptFailed { source, attempt, error } => {
                info!(target: "telemetry", event = event.name(), source, attempt, error)
            }
            IngestEvent::FallbackUsed { source, success } => {
                info!(target: "telemetry", event = event.name(), source, success)
            }
            IngestEvent::AnomalyFlagged { source, severity, description } => {
                info!(target: "telemetry", event = event.name(), source, severity = %severity, description)
            }
            IngestEvent::RunCompleted { source, success, stats } => info!(
                target: "telemetry",
                event = event.name(),
                source,
                success,
                inserted = stats.inserted,
                updated = stats.updated,
                failed = stats.failed,
                departed = stats.departed
            ),
        }
    }
}

/// External sink for run-level failures.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, source: &str, severity: Severity, message: &str) -> anyhow::Result<()>;
}

/// Posts failures to a Slack-compatible incoming webhook.
pub struct WebhookReporter {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookReporter {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    fn severity_emoji(severity: Severity) -> &'static str {
        match severity {
            Severity::Low => ":information_source:",
            Severity::Medium => ":warning:",
            Severity::High | Severity::Critical => ":rotating_light:",
        }
    }

    fn payload(source: &str, severity: Severity, message: &str) -> serde_json::Value {
        json!({
            "text": format!(
                "{} *Ingestion {}: {}*\n{}",
                Self::severity_emoji(severity),
                severity,
                source,
                message
            ),
            "unfurl_links": false,
        })
    }
}

#[async_trait]
impl ErrorReporter for WebhookReporter {
    async fn report(&self, source: &str, severity: Severity, message: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(source, severity, message))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Error webhook returned non-success");
            anyhow::bail!("Error webhook returned {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_payload_names_source_and_severity() {
        let payload = WebhookReporter::payload("votes", Severity::Critical, "retry exhausted");
        let text = payload["text"].as_str().unwrap();
        assert!(text.starts_with(":rotating_light:"));
        assert!(text.contains("critical: votes"));
        assert!(text.ends_with("retry exhausted"));
        assert_eq!(payload["unfurl_links"], false);
    }

    #[test]
    fn event_names_are_stable() {
        let event = IngestEvent::FallbackUsed {
            source: "roster".into(),
            success: true,
        };
        assert_eq!(event.to_string(), "fallback_used");
    }
}
