// Member expenditure disclosures (quarterly CSV), one record per category.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use parlwatch_common::{ExpenseRecord, ExpenseRow, MemberRef, PersistStats, ScrapeResult, ValidationOutcome};

use crate::fetch::FeedClient;
use crate::normalize::{collapse_whitespace, parse_money_cents, split_full_name};
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::store::IngestStore;
use crate::validate::BatchChecks;

use super::load_index;

/// Any single category over $1M in one quarter is not plausible.
const MAX_QUARTERLY_CENTS: i64 = 100_000_000;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Constituency", default)]
    constituency: String,
    #[serde(rename = "Salaries", default)]
    salaries: String,
    #[serde(rename = "Travel", default)]
    travel: String,
    #[serde(rename = "Hospitality", default)]
    hospitality: String,
    #[serde(rename = "Contracts", default)]
    contracts: String,
}

/// The period a disclosure file covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPeriod {
    pub fiscal_year: i32,
    pub quarter: i16,
}

/// Parse the disclosure CSV, one record per member per category.
pub fn parse_expenses(csv_text: &str, period: ReportingPeriod) -> Result<Vec<ExpenseRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed expenses CSV at row {}", line + 1))?;
        let member = match split_full_name(&row.name) {
            Some((first, last)) => MemberRef::by_name(&first, &last),
            None => MemberRef {
                external_id: None,
                first_name: None,
                last_name: Some(collapse_whitespace(&row.name)),
            },
        };
        for (category, raw) in [
            ("salaries", &row.salaries),
            ("travel", &row.travel),
            ("hospitality", &row.hospitality),
            ("contracts", &row.contracts),
        ] {
            records.push(ExpenseRecord {
                member: member.clone(),
                constituency: collapse_whitespace(&row.constituency),
                fiscal_year: period.fiscal_year,
                quarter: period.quarter,
                category: category.to_string(),
                amount_cents: parse_money_cents(raw),
            });
        }
    }
    Ok(records)
}

pub struct ExpensesSource {
    client: FeedClient,
    store: Arc<dyn IngestStore>,
    csv_url: String,
    period: ReportingPeriod,
}

impl ExpensesSource {
    pub fn new(client: FeedClient, store: Arc<dyn IngestStore>, csv_url: &str, period: ReportingPeriod) -> Self {
        Self {
            client,
            store,
            csv_url: csv_url.to_string(),
            period,
        }
    }

    async fn fetch(&self) -> Result<Vec<ExpenseRecord>> {
        let text = self.client.get_text(&self.csv_url).await?;
        parse_expenses(&text, self.period)
    }
}

#[async_trait]
impl FeedSource for ExpensesSource {
    type Record = ExpenseRecord;
    type Resolved = ExpenseRow;

    fn name(&self) -> &str {
        "expenses"
    }

    fn source_url(&self) -> String {
        self.csv_url.clone()
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<ExpenseRecord>> {
        ScrapeResult::from_result(self.fetch().await, self.source_url())
    }

    async fn prepare(&self, records: Vec<ExpenseRecord>) -> Result<PreparedBatch<ExpenseRow>> {
        let index = load_index(self.store.as_ref()).await?;
        let mut batch = PreparedBatch::new(Vec::with_capacity(records.len()));

        for record in records {
            let context = format!("{} expense", record.category);
            match index.resolve_required(&record.member, &context) {
                Some(member_id) => batch.records.push(ExpenseRow {
                    member_id,
                    fiscal_year: record.fiscal_year,
                    quarter: record.quarter,
                    category: record.category,
                    amount_cents: record.amount_cents,
                }),
                None => batch
                    .dropped
                    .push(format!("{} ({context})", record.member.describe())),
            }
        }
        Ok(batch)
    }

    fn validate(&self, batch: &PreparedBatch<ExpenseRow>) -> ValidationOutcome {
        BatchChecks::new("expense lines", &batch.records)
            .empty_batch()
            .missing("amount", |e| e.amount_cents.is_none())
            .duplicates("expense", |e| {
                format!("{} {}Q{} {}", e.member_id, e.fiscal_year, e.quarter, e.category)
            })
            .out_of_range("quarter", 1..=4, |e| Some(e.quarter))
            .negative("amount", |e| e.amount_cents)
            .implausibly_large("amount", MAX_QUARTERLY_CENTS, |e| e.amount_cents)
            .dropped("missing member reference", &batch.dropped)
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<ExpenseRow>) -> PersistStats {
        let mut stats = PersistStats::default();
        for row in &batch.records {
            match self.store.upsert_expense(row).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.failed += 1;
                    warn!(member_id = %row.member_id, category = row.category.as_str(), error = %e, "Failed to upsert expense");
                }
            }
        }
        stats
    }
}
