// Member roster: XML search export, with the rendered search page via
// Browserless as the fallback.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use browserless_client::{BrowserSession, BrowserlessClient};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use parlwatch_common::{PersistStats, RosterEntry, ScrapeResult, ValidationOutcome};

use crate::fetch::FeedClient;
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::roster::{RosterChange, RosterReconciler};
use crate::store::IngestStore;
use crate::validate::BatchChecks;

use super::member_detail::MemberDetailFetcher;
use super::strip_tags;

#[derive(Debug, Deserialize)]
struct XmlRoster {
    #[serde(rename = "MemberOfParliament", default)]
    members: Vec<XmlMember>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XmlMember {
    #[serde(default)]
    person_id: Option<String>,
    #[serde(default)]
    person_short_honorific: Option<String>,
    #[serde(default)]
    person_official_first_name: String,
    #[serde(default)]
    person_official_last_name: String,
    #[serde(default)]
    constituency_name: String,
    #[serde(default)]
    constituency_province_territory_name: String,
    #[serde(default)]
    caucus_short_name: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse the `ArrayOfMemberOfParliament` XML export.
pub fn parse_roster_xml(xml: &str) -> Result<Vec<RosterEntry>> {
    let roster: XmlRoster = quick_xml::de::from_str(xml).context("Malformed roster XML")?;
    Ok(roster
        .members
        .into_iter()
        .map(|m| RosterEntry {
            external_id: non_empty(m.person_id),
            honorific: non_empty(m.person_short_honorific),
            first_name: m.person_official_first_name,
            last_name: m.person_official_last_name,
            constituency: m.constituency_name,
            region: m.constituency_province_territory_name,
            affiliation: m.caucus_short_name,
            email: None,
            phone: None,
        })
        .collect())
}

static RE_TILE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a[^>]+href="[^"]*\((\d+)\)"[^>]*class="[^"]*ce-mip-mp-tile"#).unwrap()
});
static RE_TILE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="ce-mip-mp-(name|party|constituency|province)"[^>]*>([\s\S]*?)</div>"#).unwrap()
});

/// Parse member tiles from the rendered search page.
pub fn parse_roster_html(html: &str) -> Vec<RosterEntry> {
    let starts: Vec<(usize, String)> = RE_TILE_START
        .captures_iter(html)
        .filter_map(|c| Some((c.get(0)?.start(), c[1].to_string())))
        .collect();

    let mut entries = Vec::with_capacity(starts.len());
    for (i, (start, person_id)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(html.len());
        let tile = &html[*start..end];

        let mut entry = RosterEntry {
            external_id: Some(person_id.clone()),
            ..RosterEntry::default()
        };
        for field in RE_TILE_FIELD.captures_iter(tile) {
            let text = strip_tags(&field[2]);
            match &field[1] {
                "name" => {
                    if let Some((first, last)) = crate::normalize::split_full_name(&text) {
                        entry.first_name = first;
                        entry.last_name = last;
                    }
                }
                "party" => entry.affiliation = text,
                "constituency" => entry.constituency = text,
                "province" => entry.region = text,
                _ => {}
            }
        }
        entries.push(entry);
    }
    entries
}

pub struct RosterSource {
    client: FeedClient,
    store: Arc<dyn IngestStore>,
    base_url: String,
    reconciler: RosterReconciler,
    details: Option<MemberDetailFetcher>,
    browserless: Option<BrowserlessClient>,
    session: Mutex<Option<BrowserSession>>,
}

impl RosterSource {
    pub fn new(client: FeedClient, store: Arc<dyn IngestStore>, base_url: &str, reconciler: RosterReconciler) -> Self {
        Self {
            client,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            reconciler,
            details: None,
            browserless: None,
            session: Mutex::new(None),
        }
    }

    pub fn with_member_details(mut self, details: MemberDetailFetcher) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_browserless(mut self, browserless: BrowserlessClient) -> Self {
        self.browserless = Some(browserless);
        self
    }

    fn search_page_url(&self) -> String {
        format!("{}/Members/en/search", self.base_url)
    }

    async fn fetch_xml(&self) -> Result<Vec<RosterEntry>> {
        let xml = self.client.get_text(&self.source_url()).await?;
        let entries = parse_roster_xml(&xml)?;
        info!(entries = entries.len(), "Parsed roster XML");
        Ok(entries)
    }

    async fn fetch_rendered(&self) -> Result<Vec<RosterEntry>> {
        let browserless = self
            .browserless
            .as_ref()
            .context("Browserless is not configured")?;

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(browserless.open_session()?);
        }
        let session = guard.as_mut().context("Browser session unavailable")?;

        let html = session.content(&self.search_page_url()).await?;
        let entries = parse_roster_html(&html);
        if entries.is_empty() {
            anyhow::bail!("Rendered roster page contained no member tiles");
        }
        info!(entries = entries.len(), "Parsed rendered roster page");
        Ok(entries)
    }
}

#[async_trait]
impl FeedSource for RosterSource {
    type Record = RosterEntry;
    type Resolved = RosterChange;

    fn name(&self) -> &str {
        "roster"
    }

    fn source_url(&self) -> String {
        format!("{}/Members/en/search/XML", self.base_url)
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<RosterEntry>> {
        ScrapeResult::from_result(self.fetch_xml().await, self.source_url())
    }

    async fn fallback_extract(&self) -> ScrapeResult<Vec<RosterEntry>> {
        ScrapeResult::from_result(self.fetch_rendered().await, self.search_page_url())
    }

    async fn prepare(&self, records: Vec<RosterEntry>) -> Result<PreparedBatch<RosterChange>> {
        let (mut entries, skipped) = self.reconciler.cap(records);
        if let Some(details) = &self.details {
            details.enrich(&mut entries).await;
        }
        let existing = self
            .store
            .load_entities()
            .await
            .context("Failed to load members for roster reconciliation")?;

        let mut batch = self.reconciler.plan(&existing, &entries);
        batch.skipped = skipped;
        Ok(batch)
    }

    fn validate(&self, batch: &PreparedBatch<RosterChange>) -> ValidationOutcome {
        let upserts: Vec<_> = batch.records.iter().filter_map(RosterChange::as_upsert).collect();
        BatchChecks::new("roster entries", &upserts)
            .empty_batch()
            .missing("name", |m| m.first_name.is_empty() || m.last_name.is_empty())
            .missing("constituency", |m| m.constituency.is_empty())
            .duplicates("PersonId", |m| m.external_id.clone())
            .dropped("missing PersonId", &batch.dropped)
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<RosterChange>) -> PersistStats {
        self.reconciler.apply(self.store.as_ref(), batch).await
    }

    async fn cleanup(&self) {
        if let Some(session) = self.session.lock().await.take() {
            info!(pages = session.pages_rendered(), "Closing browser session");
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ArrayOfMemberOfParliament xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <MemberOfParliament>
    <PersonShortHonorific>Hon.</PersonShortHonorific>
    <PersonOfficialFirstName>Chrystia</PersonOfficialFirstName>
    <PersonOfficialLastName>Freeland</PersonOfficialLastName>
    <ConstituencyName>University—Rosedale</ConstituencyName>
    <ConstituencyProvinceTerritoryName>Ontario</ConstituencyProvinceTerritoryName>
    <CaucusShortName>Liberal</CaucusShortName>
    <FromDateTime>2021-09-20T00:00:00</FromDateTime>
    <PersonId>88586</PersonId>
  </MemberOfParliament>
  <MemberOfParliament>
    <PersonShortHonorific />
    <PersonOfficialFirstName>Elizabeth</PersonOfficialFirstName>
    <PersonOfficialLastName>May</PersonOfficialLastName>
    <ConstituencyName>Saanich—Gulf Islands</ConstituencyName>
    <ConstituencyProvinceTerritoryName>British Columbia</ConstituencyProvinceTerritoryName>
    <CaucusShortName>Green Party</CaucusShortName>
  </MemberOfParliament>
</ArrayOfMemberOfParliament>"#;

    #[test]
    fn parses_roster_xml() {
        let entries = parse_roster_xml(XML).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].external_id.as_deref(), Some("88586"));
        assert_eq!(entries[0].honorific.as_deref(), Some("Hon."));
        assert_eq!(entries[0].first_name, "Chrystia");
        assert_eq!(entries[0].constituency, "University—Rosedale");
        assert_eq!(entries[0].affiliation, "Liberal");

        assert_eq!(entries[1].external_id, None);
        assert_eq!(entries[1].honorific, None);
        assert_eq!(entries[1].region, "British Columbia");
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = parse_roster_xml("<ArrayOfMemberOfParliament><MemberOfParliament>").unwrap_err();
        assert!(err.to_string().contains("Malformed"));
    }

    #[test]
    fn parses_rendered_tiles() {
        let html = r#"
          <div class="ce-mip-mp-tile-container">
            <a href="/Members/en/ziad-aboultaif(89156)" class="ce-mip-mp-tile">
              <div class="ce-mip-mp-name">Ziad Aboultaif</div>
              <div class="ce-mip-mp-party">Conservative</div>
              <div class="ce-mip-mp-constituency">Edmonton Manning</div>
              <div class="ce-mip-mp-province">Alberta</div>
            </a>
            <a href="/Members/en/erin-o-toole(25524)" class="ce-mip-mp-tile">
              <div class="ce-mip-mp-honourable">The Honourable</div>
              <div class="ce-mip-mp-name">Erin O&#39;Toole</div>
              <div class="ce-mip-mp-party">Conservative</div>
              <div class="ce-mip-mp-constituency">Durham</div>
              <div class="ce-mip-mp-province">Ontario</div>
            </a>
          </div>"#;

        let entries = parse_roster_html(html);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].external_id.as_deref(), Some("89156"));
        assert_eq!(entries[0].first_name, "Ziad");
        assert_eq!(entries[0].last_name, "Aboultaif");
        assert_eq!(entries[0].region, "Alberta");
        assert_eq!(entries[1].last_name, "O'Toole");
        assert_eq!(entries[1].constituency, "Durham");
    }

    fn unreachable_source() -> RosterSource {
        use std::time::Duration;

        use crate::testing::MockStore;

        let client = FeedClient::new(Duration::from_millis(50)).unwrap();
        let browserless = BrowserlessClient::new("http://127.0.0.1:9", None, Duration::from_millis(50));
        RosterSource::new(
            client,
            Arc::new(MockStore::new()),
            "http://127.0.0.1:9",
            RosterReconciler::new(None),
        )
        .with_browserless(browserless)
    }

    #[tokio::test]
    async fn cleanup_closes_the_fallback_session() {
        let source = unreachable_source();

        let result = source.fallback_extract().await;
        assert!(!result.success);
        assert_eq!(result.source_url.as_deref(), Some("http://127.0.0.1:9/Members/en/search"));
        assert!(source.session.lock().await.is_some());

        source.cleanup().await;
        assert!(source.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn failed_run_still_closes_the_fallback_session() {
        use std::time::Duration;

        use crate::orchestrator::{FetchOptions, FetchOrchestrator};
        use crate::testing::MockStore;

        let options = FetchOptions::builder()
            .max_retries(1)
            .retry_delay(Duration::ZERO)
            .timeout(Duration::from_secs(5))
            .build();
        let anomalies = Arc::new(MockStore::new());
        let orch = FetchOrchestrator::new(unreachable_source(), options, anomalies.clone());

        let report = orch.run().await;

        assert!(!report.success);
        assert!(report.used_fallback);
        assert!(orch.source().session.lock().await.is_none());
        assert_eq!(anomalies.anomalies().len(), 1);
    }
}
