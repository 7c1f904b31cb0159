//! Batch-level anomaly detection.
//!
//! Each check emits at most one description per issue class for the whole
//! batch, so a feed with 300 malformed rows produces one anomaly, not 300.
//! The wording feeds the severity classifier; keep the integrity keywords
//! (`missing`, `duplicate`, `invalid`, `negative`) in the descriptions.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::RangeInclusive;

use chrono::NaiveDate;

use parlwatch_common::ValidationOutcome;

/// Examples quoted in a description.
const MAX_EXAMPLES: usize = 3;

pub struct BatchChecks<'a, T> {
    subject: &'static str,
    records: &'a [T],
    anomalies: Vec<String>,
}

impl<'a, T> BatchChecks<'a, T> {
    /// `subject` is the plural noun used in descriptions, e.g. `"vote records"`.
    pub fn new(subject: &'static str, records: &'a [T]) -> Self {
        Self {
            subject,
            records,
            anomalies: Vec::new(),
        }
    }

    pub fn empty_batch(mut self) -> Self {
        if self.records.is_empty() {
            self.anomalies
                .push(format!("Warning: feed returned no {}", self.subject));
        }
        self
    }

    pub fn missing(mut self, field: &str, is_missing: impl Fn(&T) -> bool) -> Self {
        let count = self.records.iter().filter(|r| is_missing(r)).count();
        if count > 0 {
            self.anomalies
                .push(format!("{count} {} missing required field {field}", self.subject));
        }
        self
    }

    pub fn duplicates<K: Hash + Eq + Display>(mut self, key_name: &str, key: impl Fn(&T) -> K) -> Self {
        let mut seen: HashMap<K, usize> = HashMap::new();
        for record in self.records {
            *seen.entry(key(record)).or_default() += 1;
        }
        let mut dupes: Vec<String> = seen
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(k, _)| k.to_string())
            .collect();
        if !dupes.is_empty() {
            dupes.sort();
            let count = dupes.len();
            dupes.truncate(MAX_EXAMPLES);
            self.anomalies.push(format!(
                "{count} duplicate {key_name} keys in {} (e.g. {})",
                self.subject,
                dupes.join(", ")
            ));
        }
        self
    }

    pub fn future_dates(mut self, field: &str, today: NaiveDate, date_of: impl Fn(&T) -> Option<NaiveDate>) -> Self {
        let future: Vec<NaiveDate> = self
            .records
            .iter()
            .filter_map(|r| date_of(r))
            .filter(|d| *d > today)
            .collect();
        if let Some(latest) = future.iter().max() {
            self.anomalies.push(format!(
                "{} {} have invalid {field} in the future (latest {latest})",
                future.len(),
                self.subject
            ));
        }
        self
    }

    pub fn out_of_range<V: PartialOrd + Display + Copy>(
        mut self,
        field: &str,
        range: RangeInclusive<V>,
        value_of: impl Fn(&T) -> Option<V>,
    ) -> Self {
        let bad: Vec<V> = self
            .records
            .iter()
            .filter_map(|r| value_of(r))
            .filter(|v| !range.contains(v))
            .collect();
        if !bad.is_empty() {
            let examples: Vec<String> = bad.iter().take(MAX_EXAMPLES).map(|v| v.to_string()).collect();
            self.anomalies.push(format!(
                "{} {} have invalid {field} outside {}..={} (e.g. {})",
                bad.len(),
                self.subject,
                range.start(),
                range.end(),
                examples.join(", ")
            ));
        }
        self
    }

    pub fn negative(mut self, field: &str, value_of: impl Fn(&T) -> Option<i64>) -> Self {
        let count = self
            .records
            .iter()
            .filter_map(|r| value_of(r))
            .filter(|v| *v < 0)
            .count();
        if count > 0 {
            self.anomalies
                .push(format!("{count} {} have negative {field}", self.subject));
        }
        self
    }

    pub fn implausibly_large(mut self, field: &str, ceiling: i64, value_of: impl Fn(&T) -> Option<i64>) -> Self {
        let count = self
            .records
            .iter()
            .filter_map(|r| value_of(r))
            .filter(|v| *v > ceiling)
            .count();
        if count > 0 {
            self.anomalies.push(format!(
                "{count} {} have invalid {field}: implausibly large (over {ceiling})",
                self.subject
            ));
        }
        self
    }

    /// Records dropped before validation. `reason` should name what was
    /// missing, e.g. `"missing member reference"`.
    pub fn dropped(mut self, reason: &str, dropped: &[String]) -> Self {
        if !dropped.is_empty() {
            let examples: Vec<&str> = dropped.iter().take(MAX_EXAMPLES).map(String::as_str).collect();
            self.anomalies.push(format!(
                "{} {} dropped for {reason} (e.g. {})",
                dropped.len(),
                self.subject,
                examples.join("; ")
            ));
        }
        self
    }

    pub fn finish(self) -> ValidationOutcome {
        ValidationOutcome::from_anomalies(self.anomalies)
    }
}
