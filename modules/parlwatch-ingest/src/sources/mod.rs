//! Feed sources. One `FeedSource` implementation per upstream feed.

pub mod bills;
pub mod expenses;
pub mod member_detail;
pub mod petitions;
pub mod roster;
pub mod votes;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::resolve::EntityIndex;
use crate::store::IngestStore;

pub use bills::BillsSource;
pub use expenses::ExpensesSource;
pub use member_detail::MemberDetailFetcher;
pub use petitions::PetitionsSource;
pub use roster::RosterSource;
pub use votes::VotesSource;

/// Build the resolver index from every stored member, active or past.
pub(crate) async fn load_index(store: &dyn IngestStore) -> Result<EntityIndex> {
    let entities = store
        .load_entities()
        .await
        .context("Failed to load members for resolution")?;
    Ok(EntityIndex::build(&entities))
}

/// Parse the leading `YYYY-MM-DD` of a date or timestamp string.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Parse an RFC 3339 timestamp, or a zone-less one taken as UTC.
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Decode the handful of HTML entities the feeds actually emit.
pub(crate) fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "’")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&eacute;", "é")
        .replace("&Eacute;", "É")
        .replace("&egrave;", "è")
        .replace("&amp;", "&")
}

/// Drop markup and decode entities, leaving collapsed text.
pub(crate) fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    crate::normalize::collapse_whitespace(&decode_entities(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_from_timestamps() {
        assert_eq!(parse_date("2024-06-19T15:30:00"), NaiveDate::from_ymd_opt(2024, 6, 19));
        assert_eq!(parse_date("2024-06-19"), NaiveDate::from_ymd_opt(2024, 6, 19));
        assert_eq!(parse_date("June 19"), None);
    }

    #[test]
    fn parses_zoned_and_naive_timestamps() {
        let zoned = parse_datetime("2024-06-19T15:30:00-04:00").unwrap();
        assert_eq!(zoned.to_rfc3339(), "2024-06-19T19:30:00+00:00");
        let naive = parse_datetime("2024-06-19T15:30:00.123").unwrap();
        assert_eq!(naive.format("%H:%M").to_string(), "15:30");
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn strips_markup() {
        assert_eq!(strip_tags("<p>Status:&nbsp;<b>Open</b></p>"), "Status: Open");
        assert_eq!(decode_entities("O&#39;Toole &amp; co"), "O'Toole & co");
    }
}
