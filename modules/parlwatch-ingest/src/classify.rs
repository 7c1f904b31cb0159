//! Severity classification for anomaly descriptions.
//!
//! Rules are checked in order and the first match wins. The order is
//! load-bearing: integrity problems stay HIGH even when the text also talks
//! about retries, and an exhausted retry outranks the generic "timeout" or
//! "retry" wording of a recoverable hiccup.
//
// TODO: replace the keyword lists with a declarative rule table loaded from
// config once the review surface can show which rule fired.

use parlwatch_common::{AnomalyCategory, Severity};

struct Rule {
    name: &'static str,
    category: AnomalyCategory,
    severity: Severity,
    keywords: &'static [&'static str],
    /// The rule is skipped when any of these also appear.
    unless: &'static [&'static str],
}

impl Rule {
    fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|kw| text.contains(kw))
            && !self.unless.iter().any(|kw| text.contains(kw))
    }
}

const RULES: &[Rule] = &[
    Rule {
        name: "data_integrity",
        category: AnomalyCategory::DataIntegrity,
        severity: Severity::High,
        keywords: &[
            "invalid",
            "missing",
            "incorrect",
            "corrupt",
            "malformed",
            "validation failed",
            "duplicate",
            "negative",
        ],
        unless: &[],
    },
    Rule {
        name: "retry_exhausted",
        category: AnomalyCategory::RetryExhausted,
        severity: Severity::Critical,
        keywords: &[
            "retry exhausted",
            "retries exhausted",
            "retry failed",
            "failed retry",
            "max retries",
            "retry limit",
        ],
        unless: &[],
    },
    Rule {
        name: "retrying",
        category: AnomalyCategory::Recoverable,
        severity: Severity::Medium,
        keywords: &["retry", "retrying"],
        unless: &["fail", "exhausted", "fatal", "error"],
    },
    Rule {
        name: "recoverable",
        category: AnomalyCategory::Recoverable,
        severity: Severity::Medium,
        keywords: &[
            "recovered",
            "connection refused",
            "connection reset",
            "connection error",
            "connection closed",
            "connection timeout",
            "econnrefused",
            "econnreset",
            "timeout",
            "timed out",
            "warning",
            "unexpected",
        ],
        unless: &[],
    },
    Rule {
        name: "system_failure",
        category: AnomalyCategory::SystemFailure,
        severity: Severity::Critical,
        keywords: &[
            "critical",
            "failed",
            "fatal error",
            "system error",
            "database error",
            "permission denied",
            "access denied",
        ],
        unless: &[],
    },
];

/// Severity and category assigned to one anomaly description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub category: AnomalyCategory,
    /// Name of the rule that matched, `"default"` when none did.
    pub rule: &'static str,
}

/// Classify a free-text anomaly description. Pure and deterministic.
pub fn classify(description: &str) -> Classification {
    let text = description.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&text))
        .map(|rule| Classification {
            severity: rule.severity,
            category: rule.category,
            rule: rule.name,
        })
        .unwrap_or(Classification {
            severity: Severity::Low,
            category: AnomalyCategory::Informational,
            rule: "default",
        })
}

pub fn severity_of(description: &str) -> Severity {
    classify(description).severity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_beats_failed_retry() {
        let c = classify("duplicate votes detected after max retries");
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.category, AnomalyCategory::DataIntegrity);
    }

    #[test]
    fn integrity_beats_connection_wording() {
        assert_eq!(severity_of("Malformed XML after connection reset"), Severity::High);
        assert_eq!(severity_of("Validation failed for 3 records"), Severity::High);
        assert_eq!(severity_of("2 expense lines with negative amounts"), Severity::High);
    }

    #[test]
    fn failed_retry_beats_timeout() {
        let c = classify("retry limit reached - timeout connecting");
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.rule, "retry_exhausted");
    }

    #[test]
    fn failed_retry_phrasings_are_critical() {
        for text in [
            "Retry exhausted after 3 attempts",
            "all retries exhausted",
            "retry failed on page 2",
            "failed retry for member 123",
            "gave up after max retries",
        ] {
            assert_eq!(severity_of(text), Severity::Critical, "{text}");
        }
    }

    #[test]
    fn recoverable_wording_is_medium() {
        for text in [
            "retrying roster fetch",
            "Primary extraction recovered via fallback after 3 attempts",
            "connection refused by upstream",
            "request timed out",
            "warning: feed returned fewer rows than last run",
            "unexpected content type",
        ] {
            assert_eq!(severity_of(text), Severity::Medium, "{text}");
        }
    }

    #[test]
    fn retry_with_failure_wording_is_critical() {
        for text in [
            "retry of roster fetch failed",
            "retry attempt 3 failed: fatal error in parser",
        ] {
            let c = classify(text);
            assert_eq!(c.severity, Severity::Critical, "{text}");
            assert_eq!(c.category, AnomalyCategory::SystemFailure, "{text}");
        }
    }

    #[test]
    fn plain_retry_is_recoverable() {
        let c = classify("retrying roster fetch");
        assert_eq!(c.severity, Severity::Medium);
        assert_eq!(c.rule, "retrying");
    }

    #[test]
    fn recoverable_beats_generic_failure() {
        // "recovered" is checked before the bare "failed" keyword.
        assert_eq!(severity_of("primary failed but recovered"), Severity::Medium);
    }

    #[test]
    fn generic_failures_are_critical() {
        for text in [
            "Fetch failed with status 503",
            "fatal error in parser",
            "Database error: relation does not exist",
            "permission denied for table votes",
            "critical: store unreachable",
        ] {
            let c = classify(text);
            assert_eq!(c.severity, Severity::Critical, "{text}");
            assert_eq!(c.category, AnomalyCategory::SystemFailure, "{text}");
        }
    }

    #[test]
    fn everything_else_is_low() {
        let c = classify("roster size changed from 338 to 337");
        assert_eq!(c.severity, Severity::Low);
        assert_eq!(c.category, AnomalyCategory::Informational);
        assert_eq!(c.rule, "default");
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(severity_of("DUPLICATE KEY"), severity_of("duplicate key"));
    }
}
