// E-petitions from the RSS search feed.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use parlwatch_common::{
    MemberRef, PersistStats, PetitionRecord, PetitionRow, ScrapeResult, ValidationOutcome,
};

use crate::fetch::FeedClient;
use crate::normalize::{collapse_whitespace, sanitize_label, split_full_name};
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::store::IngestStore;
use crate::validate::BatchChecks;

use super::{decode_entities, load_index, parse_date};

static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(e-\d{3,5}|\d{3}-\d{5})\b").unwrap());
static RE_SPONSOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sponsor(?:ing member)?\s*:\s*([^(\n]+)").unwrap());
static RE_SIGNATURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(-?\d[\d,]*)\s+signatures?").unwrap());
static RE_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)status\s*:\s*([^.\n]+)").unwrap());
static RE_CLOSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)closed[^:]*:\s*(\d{4}-\d{2}-\d{2})").unwrap());
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Summary text with one line per markup block, so field patterns stop at block ends.
fn summary_lines(html: &str) -> String {
    decode_entities(&RE_TAG.replace_all(html, "\n"))
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn petition_from_entry(entry: feed_rs::model::Entry) -> PetitionRecord {
    let raw_title = entry.title.map(|t| t.content).unwrap_or_default();
    let url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_else(|| entry.id.clone());
    let summary = entry
        .summary
        .map(|s| summary_lines(&s.content))
        .or_else(|| entry.content.and_then(|c| c.body).map(|b| summary_lines(&b)))
        .unwrap_or_default();

    let petition_number = RE_NUMBER
        .captures(&raw_title)
        .or_else(|| RE_NUMBER.captures(&url))
        .map(|c| c[1].to_lowercase())
        .unwrap_or_default();

    let title = {
        let without_number = RE_NUMBER.replace(&raw_title, "");
        let trimmed = without_number.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '—' | '(' | ')'));
        sanitize_label(&collapse_whitespace(trimmed))
    };

    let sponsor = RE_SPONSOR
        .captures(&summary)
        .and_then(|c| split_full_name(c[1].trim()))
        .map(|(first, last)| MemberRef::by_name(&first, &last));

    let signatures = RE_SIGNATURES
        .captures(&summary)
        .and_then(|c| c[1].replace(',', "").parse::<i64>().ok());

    let status = RE_STATUS
        .captures(&summary)
        .map(|c| sanitize_label(&c[1]))
        .unwrap_or_default();

    let closed_on: Option<NaiveDate> = RE_CLOSED.captures(&summary).and_then(|c| parse_date(&c[1]));

    PetitionRecord {
        petition_number,
        title,
        sponsor,
        status,
        signatures,
        opened_on: entry.published.or(entry.updated).map(|d| d.date_naive()),
        closed_on,
        url,
    }
}

pub fn parse_petitions(bytes: &[u8]) -> Result<Vec<PetitionRecord>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse petitions RSS/Atom feed")?;
    Ok(feed.entries.into_iter().map(petition_from_entry).collect())
}

pub struct PetitionsSource {
    client: FeedClient,
    store: Arc<dyn IngestStore>,
    feed_url: String,
}

impl PetitionsSource {
    pub fn new(client: FeedClient, store: Arc<dyn IngestStore>, feed_url: &str) -> Self {
        Self {
            client,
            store,
            feed_url: feed_url.to_string(),
        }
    }

    async fn fetch(&self) -> Result<Vec<PetitionRecord>> {
        let body = self.client.get_text(&self.feed_url).await?;
        parse_petitions(body.as_bytes())
    }
}

#[async_trait]
impl FeedSource for PetitionsSource {
    type Record = PetitionRecord;
    type Resolved = PetitionRow;

    fn name(&self) -> &str {
        "petitions"
    }

    fn source_url(&self) -> String {
        self.feed_url.clone()
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<PetitionRecord>> {
        ScrapeResult::from_result(self.fetch().await, self.source_url())
    }

    async fn prepare(&self, records: Vec<PetitionRecord>) -> Result<PreparedBatch<PetitionRow>> {
        let index = load_index(self.store.as_ref()).await?;
        let mut batch = PreparedBatch::new(Vec::with_capacity(records.len()));

        for p in records {
            if p.petition_number.is_empty() {
                batch.dropped.push(if p.title.is_empty() { p.url } else { p.title });
                continue;
            }
            let context = format!("petition {} sponsor", p.petition_number);
            batch.records.push(PetitionRow {
                sponsor_id: index.resolve_optional(p.sponsor.as_ref(), &context),
                petition_number: p.petition_number,
                title: p.title,
                status: p.status,
                signatures: p.signatures,
                opened_on: p.opened_on,
                closed_on: p.closed_on,
                url: p.url,
            });
        }
        Ok(batch)
    }

    fn validate(&self, batch: &PreparedBatch<PetitionRow>) -> ValidationOutcome {
        BatchChecks::new("petitions", &batch.records)
            .empty_batch()
            .missing("title", |p| p.title.is_empty())
            .duplicates("petition", |p| p.petition_number.clone())
            .negative("signature count", |p| p.signatures)
            .future_dates("opening date", Utc::now().date_naive(), |p| p.opened_on)
            .dropped("missing petition number", &batch.dropped)
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<PetitionRow>) -> PersistStats {
        let mut stats = PersistStats::default();
        for row in &batch.records {
            match self.store.upsert_petition(row).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.failed += 1;
                    warn!(petition = row.petition_number.as_str(), error = %e, "Failed to upsert petition");
                }
            }
        }
        stats
    }
}
