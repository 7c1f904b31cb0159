// Per-member profile pages: contact details the roster XML does not carry.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use parlwatch_common::RosterEntry;

use crate::fetch::FeedClient;
use crate::orchestrator::{retry_with, RetryPolicy};

use super::decode_entities;

/// Tries per member; waits 1s, 2s, 4s between them.
const DETAIL_ATTEMPTS: u32 = 4;
const DETAIL_BASE_DELAY: Duration = Duration::from_secs(1);
/// Minimum gap between requests for two different members.
const DETAIL_SPACING: Duration = Duration::from_secs(1);

static RE_MAILTO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']mailto:([^"'?]+)"#).unwrap());
static RE_TEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']tel:([^"']+)"#).unwrap());
static RE_TELEPHONE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)telephone\s*:?\s*(?:</[^>]+>\s*)*(\(?\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4})").unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Pull the first `mailto:` address and telephone number out of a profile page.
pub fn parse_contact(html: &str) -> ContactDetails {
    let email = RE_MAILTO
        .captures(html)
        .map(|c| decode_entities(c[1].trim()).to_lowercase())
        .filter(|e| e.contains('@'));
    let phone = RE_TEL
        .captures(html)
        .or_else(|| RE_TELEPHONE_LABEL.captures(html))
        .map(|c| c[1].trim().to_string());
    ContactDetails { email, phone }
}

/// Fetches member profile pages with exponential backoff and fixed spacing.
pub struct MemberDetailFetcher {
    client: FeedClient,
    base_url: String,
    spacing: Duration,
    base_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MemberDetailFetcher {
    pub fn new(client: FeedClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spacing: DETAIL_SPACING,
            base_delay: DETAIL_BASE_DELAY,
            last_request: Mutex::new(None),
        }
    }

    /// Override request spacing and backoff base.
    pub fn with_timing(mut self, spacing: Duration, base_delay: Duration) -> Self {
        self.spacing = spacing;
        self.base_delay = base_delay;
        self
    }

    pub fn profile_url(&self, person_id: &str) -> String {
        format!("{}/Members/en/{}", self.base_url, person_id)
    }

    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.spacing;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn fetch(&self, person_id: &str) -> Result<ContactDetails> {
        self.wait_turn().await;
        let url = self.profile_url(person_id);
        retry_with(RetryPolicy::Exponential, self.base_delay, DETAIL_ATTEMPTS, |attempt| {
            let url = url.clone();
            async move {
                debug!(url = url.as_str(), attempt, "Fetching member profile");
                let html = self.client.get_text(&url).await?;
                Ok(parse_contact(&html))
            }
        })
        .await
    }

    /// Fill missing email and phone on each entry. Failures leave the entry as is.
    pub async fn enrich(&self, entries: &mut [RosterEntry]) {
        let mut enriched = 0;
        for entry in entries.iter_mut() {
            let Some(person_id) = entry.external_id.clone() else {
                continue;
            };
            match self.fetch(&person_id).await {
                Ok(contact) => {
                    if entry.email.is_none() {
                        entry.email = contact.email;
                    }
                    if entry.phone.is_none() {
                        entry.phone = contact.phone;
                    }
                    enriched += 1;
                }
                Err(e) => warn!(person_id = person_id.as_str(), error = %e, "Member detail fetch failed"),
            }
        }
        info!(enriched, total = entries.len(), "Fetched member details");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_mailto_and_tel_links() {
        let html = r#"
            <a href="mailto:Elizabeth.May@parl.gc.ca?subject=Hi">Email</a>
            <a href="tel:613-996-1119">613-996-1119</a>
        "#;
        let contact = parse_contact(html);
        assert_eq!(contact.email.as_deref(), Some("elizabeth.may@parl.gc.ca"));
        assert_eq!(contact.phone.as_deref(), Some("613-996-1119"));
    }

    #[test]
    fn falls_back_to_telephone_label() {
        let html = "<p><strong>Telephone:</strong> 613-992-4211</p>";
        assert_eq!(parse_contact(html).phone.as_deref(), Some("613-992-4211"));
    }

    #[test]
    fn missing_contact_is_none() {
        assert_eq!(parse_contact("<p>No contact</p>"), ContactDetails::default());
    }

    #[tokio::test]
    async fn spacing_applies_between_requests() {
        let client = FeedClient::new(Duration::from_secs(1)).unwrap();
        let fetcher = MemberDetailFetcher::new(client, "http://localhost")
            .with_timing(Duration::from_millis(50), Duration::ZERO);

        let start = Instant::now();
        fetcher.wait_turn().await;
        fetcher.wait_turn().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
