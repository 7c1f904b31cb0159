// Bills from the LEGISinfo JSON export.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use parlwatch_common::{BillRecord, BillRow, MemberRef, PersistStats, ScrapeResult, ValidationOutcome};

use crate::fetch::FeedClient;
use crate::normalize::{sanitize_label, split_full_name};
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::store::IngestStore;
use crate::validate::BatchChecks;

use super::{load_index, parse_date, parse_datetime};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonBill {
    #[serde(default)]
    bill_number_formatted: String,
    parliament_number: i16,
    session_number: i16,
    #[serde(default)]
    long_title_en: String,
    #[serde(default)]
    short_title_en: Option<String>,
    #[serde(default)]
    sponsor_person_id: Option<i64>,
    #[serde(default)]
    sponsor_en: Option<String>,
    #[serde(default)]
    current_status_en: String,
    #[serde(default)]
    passed_house_first_reading_date_time: Option<String>,
    #[serde(default)]
    latest_activity_date_time: Option<String>,
}

fn sponsor_ref(person_id: Option<i64>, name: Option<&str>) -> Option<MemberRef> {
    let (first_name, last_name) = match name.and_then(split_full_name) {
        Some((first, last)) => (Some(first), Some(last)),
        None => (None, None),
    };
    let external_id = person_id.map(|id| id.to_string());
    if external_id.is_none() && first_name.is_none() {
        return None;
    }
    Some(MemberRef {
        external_id,
        first_name,
        last_name,
    })
}

pub fn parse_bills(json: &str) -> Result<Vec<BillRecord>> {
    let bills: Vec<JsonBill> = serde_json::from_str(json).context("Malformed LEGISinfo JSON")?;
    Ok(bills
        .into_iter()
        .map(|b| BillRecord {
            parliament: b.parliament_number,
            session: b.session_number,
            bill_number: sanitize_label(&b.bill_number_formatted).to_uppercase(),
            title: sanitize_label(&b.long_title_en),
            short_title: b
                .short_title_en
                .map(|t| sanitize_label(&t))
                .filter(|t| !t.is_empty()),
            sponsor: sponsor_ref(b.sponsor_person_id, b.sponsor_en.as_deref()),
            status: sanitize_label(&b.current_status_en),
            introduced_on: b.passed_house_first_reading_date_time.as_deref().and_then(parse_date),
            latest_activity_at: b.latest_activity_date_time.as_deref().and_then(parse_datetime),
        })
        .collect())
}

pub struct BillsSource {
    client: FeedClient,
    store: Arc<dyn IngestStore>,
    base_url: String,
    parliament_session: String,
}

impl BillsSource {
    pub fn new(client: FeedClient, store: Arc<dyn IngestStore>, base_url: &str, parliament_session: &str) -> Self {
        Self {
            client,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            parliament_session: parliament_session.to_string(),
        }
    }

    async fn fetch(&self) -> Result<Vec<BillRecord>> {
        let json = self.client.get_text(&self.source_url()).await?;
        parse_bills(&json)
    }
}

#[async_trait]
impl FeedSource for BillsSource {
    type Record = BillRecord;
    type Resolved = BillRow;

    fn name(&self) -> &str {
        "bills"
    }

    fn source_url(&self) -> String {
        format!("{}/en/bills/json?parlsession={}", self.base_url, self.parliament_session)
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<BillRecord>> {
        ScrapeResult::from_result(self.fetch().await, self.source_url())
    }

    async fn prepare(&self, records: Vec<BillRecord>) -> Result<PreparedBatch<BillRow>> {
        let index = load_index(self.store.as_ref()).await?;
        let rows = records
            .into_iter()
            .map(|b| {
                let context = format!("bill {} sponsor", b.bill_number);
                BillRow {
                    sponsor_id: index.resolve_optional(b.sponsor.as_ref(), &context),
                    parliament: b.parliament,
                    session: b.session,
                    bill_number: b.bill_number,
                    title: b.title,
                    short_title: b.short_title,
                    status: b.status,
                    introduced_on: b.introduced_on,
                    latest_activity_at: b.latest_activity_at,
                }
            })
            .collect();
        Ok(PreparedBatch::new(rows))
    }

    fn validate(&self, batch: &PreparedBatch<BillRow>) -> ValidationOutcome {
        BatchChecks::new("bills", &batch.records)
            .empty_batch()
            .missing("bill number", |b| b.bill_number.is_empty())
            .missing("title", |b| b.title.is_empty())
            .duplicates("bill", |b| format!("{}-{} {}", b.parliament, b.session, b.bill_number))
            .future_dates("introduction date", Utc::now().date_naive(), |b| b.introduced_on)
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<BillRow>) -> PersistStats {
        let mut stats = PersistStats::default();
        for row in &batch.records {
            match self.store.upsert_bill(row).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.failed += 1;
                    warn!(bill = row.bill_number.as_str(), error = %e, "Failed to upsert bill");
                }
            }
        }
        stats
    }
}
