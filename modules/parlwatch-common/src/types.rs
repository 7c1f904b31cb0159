use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Canonical entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Past,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Past => "past",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "past" => EntityStatus::Past,
            _ => EntityStatus::Active,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of parliament as stored internally. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: Uuid,
    /// Upstream PersonId. Unique across active and past members when present.
    pub external_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub constituency: String,
    /// Province or territory.
    pub region: String,
    /// Caucus short name.
    pub affiliation: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// --- Extraction results ---

/// Uniform return shape of every extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub source_url: Option<String>,
}

impl<T> ScrapeResult<T> {
    pub fn ok(data: T, source_url: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            source_url: Some(source_url.into()),
        }
    }

    pub fn failed(error: impl Into<String>, source_url: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            source_url,
        }
    }

    /// Collapse an `anyhow` result into the uniform shape, keeping the full error chain.
    pub fn from_result(result: anyhow::Result<T>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        match result {
            Ok(data) => Self::ok(data, source_url),
            Err(e) => Self::failed(format!("{e:#}"), Some(source_url)),
        }
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Validator output for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub anomalies: Vec<String>,
}

impl ValidationOutcome {
    pub fn from_anomalies(anomalies: Vec<String>) -> Self {
        Self {
            is_valid: anomalies.is_empty(),
            anomalies,
        }
    }
}

// --- Anomalies ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Reviewed => write!(f, "reviewed"),
            Self::Resolved => write!(f, "resolved"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    DataIntegrity,
    RetryExhausted,
    Recoverable,
    SystemFailure,
    Informational,
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataIntegrity => write!(f, "data_integrity"),
            Self::RetryExhausted => write!(f, "retry_exhausted"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::SystemFailure => write!(f, "system_failure"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// A flagged ingestion anomaly awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub source_component: String,
    pub external_job_id: Option<String>,
    pub category: AnomalyCategory,
    pub description: String,
    pub severity: Severity,
    pub status: AnomalyStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Anomaly {
    pub fn new(
        source_component: &str,
        external_job_id: Option<String>,
        category: AnomalyCategory,
        severity: Severity,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_component: source_component.to_string(),
            external_job_id,
            category,
            description,
            severity,
            status: AnomalyStatus::Pending,
            created_at: Utc::now(),
            reviewed_by: None,
            reviewed_at: None,
        }
    }
}

// --- Fuzzy matching ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    None,
    Low,
    Medium,
    High,
    Exact,
}

impl MatchTier {
    /// Only exact and high-confidence matches may be linked without review.
    pub fn auto_applicable(&self) -> bool {
        matches!(self, MatchTier::Exact | MatchTier::High)
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfidence {
    pub tier: MatchTier,
    /// 0.0-1.0
    pub score: f64,
}

// --- Persistence ---

/// Whether an upsert created a new row or touched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

/// Per-batch persistence counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
    /// Records intentionally left out (dry-run cap).
    pub skipped: u64,
    /// Canonical entities transitioned to `past` (roster only).
    pub departed: u64,
}

impl PersistStats {
    pub fn record(&mut self, outcome: Upserted) {
        match outcome {
            Upserted::Inserted => self.inserted += 1,
            Upserted::Updated => self.updated += 1,
        }
    }
}

impl fmt::Display for PersistStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} failed={} skipped={} departed={}",
            self.inserted, self.updated, self.failed, self.skipped, self.departed
        )
    }
}
