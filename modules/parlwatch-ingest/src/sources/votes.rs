// Recorded divisions: the division list, then each division's ballots.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use parlwatch_common::{
    Ballot, MemberRef, PersistStats, ScrapeResult, ValidationOutcome, VoteRecord, VoteRow,
};

use crate::fetch::FeedClient;
use crate::normalize::sanitize_label;
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::store::IngestStore;
use crate::validate::BatchChecks;

use super::{load_index, parse_date};

#[derive(Debug, Deserialize)]
struct XmlDivisions {
    #[serde(rename = "Vote", default)]
    votes: Vec<XmlDivision>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XmlDivision {
    parliament_number: i16,
    session_number: i16,
    decision_division_number: i32,
    #[serde(default)]
    decision_event_date_time: String,
    #[serde(default)]
    decision_division_subject: String,
    #[serde(default)]
    decision_result_name: String,
}

#[derive(Debug, Deserialize)]
struct XmlParticipants {
    #[serde(rename = "VoteParticipant", default)]
    participants: Vec<XmlParticipant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XmlParticipant {
    #[serde(default)]
    person_id: Option<String>,
    #[serde(default)]
    person_official_first_name: Option<String>,
    #[serde(default)]
    person_official_last_name: Option<String>,
    #[serde(default)]
    vote_value_name: String,
    #[serde(default)]
    is_vote_paired: Option<String>,
}

/// One division from the list export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Division {
    pub parliament: i16,
    pub session: i16,
    pub number: i32,
    pub date: Option<NaiveDate>,
    pub subject: String,
    pub result: String,
}

pub fn parse_divisions(xml: &str) -> Result<Vec<Division>> {
    let list: XmlDivisions = quick_xml::de::from_str(xml).context("Malformed division list XML")?;
    Ok(list
        .votes
        .into_iter()
        .map(|v| Division {
            parliament: v.parliament_number,
            session: v.session_number,
            number: v.decision_division_number,
            date: parse_date(&v.decision_event_date_time),
            subject: sanitize_label(&v.decision_division_subject),
            result: sanitize_label(&v.decision_result_name),
        })
        .collect())
}

/// Expand one division's ballot export into per-member vote records.
pub fn parse_ballots(division: &Division, xml: &str) -> Result<Vec<VoteRecord>> {
    let list: XmlParticipants = quick_xml::de::from_str(xml)
        .with_context(|| format!("Malformed ballot XML for division {}", division.number))?;
    Ok(list
        .participants
        .into_iter()
        .map(|p| {
            let paired = p
                .is_vote_paired
                .as_deref()
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
            VoteRecord {
                parliament: division.parliament,
                session: division.session,
                vote_number: division.number,
                date: division.date,
                subject: division.subject.clone(),
                result: division.result.clone(),
                member: MemberRef {
                    external_id: p.person_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()),
                    first_name: p.person_official_first_name,
                    last_name: p.person_official_last_name,
                },
                ballot: if paired {
                    Some(Ballot::Paired)
                } else {
                    Ballot::parse(&p.vote_value_name)
                },
            }
        })
        .collect())
}

pub struct VotesSource {
    client: FeedClient,
    store: Arc<dyn IngestStore>,
    base_url: String,
    parliament: i16,
    session: i16,
    /// Most recent divisions to fetch ballots for.
    limit: usize,
}

impl VotesSource {
    pub fn new(
        client: FeedClient,
        store: Arc<dyn IngestStore>,
        base_url: &str,
        (parliament, session): (i16, i16),
        limit: usize,
    ) -> Self {
        Self {
            client,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            parliament,
            session,
            limit,
        }
    }

    fn ballots_url(&self, division: &Division) -> String {
        format!(
            "{}/Members/en/votes/{}/{}/{}/xml",
            self.base_url, division.parliament, division.session, division.number
        )
    }

    async fn fetch(&self) -> Result<Vec<VoteRecord>> {
        let xml = self.client.get_text(&self.source_url()).await?;
        let mut divisions: Vec<Division> = parse_divisions(&xml)?
            .into_iter()
            .filter(|d| d.parliament == self.parliament && d.session == self.session)
            .collect();
        divisions.sort_by(|a, b| b.number.cmp(&a.number));
        divisions.truncate(self.limit);
        info!(divisions = divisions.len(), "Fetching ballots for recent divisions");

        let mut records = Vec::new();
        for division in &divisions {
            let xml = self.client.get_text(&self.ballots_url(division)).await?;
            records.extend(parse_ballots(division, &xml)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl FeedSource for VotesSource {
    type Record = VoteRecord;
    type Resolved = VoteRow;

    fn name(&self) -> &str {
        "votes"
    }

    fn source_url(&self) -> String {
        format!("{}/Members/en/votes/XML", self.base_url)
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<VoteRecord>> {
        ScrapeResult::from_result(self.fetch().await, self.source_url())
    }

    async fn prepare(&self, records: Vec<VoteRecord>) -> Result<PreparedBatch<VoteRow>> {
        let index = load_index(self.store.as_ref()).await?;
        let mut batch = PreparedBatch::new(Vec::with_capacity(records.len()));

        for record in records {
            let context = format!("vote {}", record.vote_number);
            match index.resolve_required(&record.member, &context) {
                Some(member_id) => batch.records.push(VoteRow {
                    member_id,
                    parliament: record.parliament,
                    session: record.session,
                    vote_number: record.vote_number,
                    date: record.date,
                    subject: record.subject,
                    result: record.result,
                    ballot: record.ballot,
                }),
                None => batch
                    .dropped
                    .push(format!("{} in {context}", record.member.describe())),
            }
        }
        Ok(batch)
    }

    fn validate(&self, batch: &PreparedBatch<VoteRow>) -> ValidationOutcome {
        BatchChecks::new("vote records", &batch.records)
            .empty_batch()
            .missing("ballot", |v| v.ballot.is_none())
            .missing("date", |v| v.date.is_none())
            .duplicates("vote", |v| {
                format!("{}/{}-{}#{}", v.member_id, v.parliament, v.session, v.vote_number)
            })
            .future_dates("vote date", Utc::now().date_naive(), |v| v.date)
            .dropped("missing member reference", &batch.dropped)
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<VoteRow>) -> PersistStats {
        let mut stats = PersistStats::default();
        for row in &batch.records {
            match self.store.upsert_vote(row).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.failed += 1;
                    warn!(vote = row.vote_number, member_id = %row.member_id, error = %e, "Failed to upsert vote");
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIVISIONS: &str = r#"<ArrayOfVote>
  <Vote>
    <ParliamentNumber>44</ParliamentNumber>
    <SessionNumber>1</SessionNumber>
    <DecisionEventDateTime>2024-06-19T15:30:00</DecisionEventDateTime>
    <DecisionDivisionNumber>812</DecisionDivisionNumber>
    <DecisionDivisionSubject>3rd reading of Bill C-69</DecisionDivisionSubject>
    <DecisionResultName>Agreed To</DecisionResultName>
  </Vote>
  <Vote>
    <ParliamentNumber>43</ParliamentNumber>
    <SessionNumber>2</SessionNumber>
    <DecisionEventDateTime>2021-06-01T15:30:00</DecisionEventDateTime>
    <DecisionDivisionNumber>150</DecisionDivisionNumber>
    <DecisionDivisionSubject>Opposition Motion</DecisionDivisionSubject>
    <DecisionResultName>Negatived</DecisionResultName>
  </Vote>
</ArrayOfVote>"#;

    const BALLOTS: &str = r#"<ArrayOfVoteParticipant>
  <VoteParticipant>
    <PersonOfficialFirstName>Elizabeth</PersonOfficialFirstName>
    <PersonOfficialLastName>May</PersonOfficialLastName>
    <VoteValueName>Nay</VoteValueName>
    <IsVotePaired>false</IsVotePaired>
    <PersonId>2897</PersonId>
  </VoteParticipant>
  <VoteParticipant>
    <PersonOfficialFirstName>Mark</PersonOfficialFirstName>
    <PersonOfficialLastName>Gerretsen</PersonOfficialLastName>
    <VoteValueName>Yea</VoteValueName>
    <IsVotePaired>true</IsVotePaired>
    <PersonId>88802</PersonId>
  </VoteParticipant>
</ArrayOfVoteParticipant>"#;

    #[test]
    fn parses_division_list() {
        let divisions = parse_divisions(DIVISIONS).unwrap();
        assert_eq!(divisions.len(), 2);
        assert_eq!(divisions[0].number, 812);
        assert_eq!(divisions[0].date, NaiveDate::from_ymd_opt(2024, 6, 19));
        assert_eq!(divisions[0].result, "Agreed To");
        assert_eq!(divisions[1].parliament, 43);
    }

    #[test]
    fn expands_ballots_per_member() {
        let division = &parse_divisions(DIVISIONS).unwrap()[0];
        let records = parse_ballots(division, BALLOTS).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].vote_number, 812);
        assert_eq!(records[0].member.external_id.as_deref(), Some("2897"));
        assert_eq!(records[0].ballot, Some(Ballot::Nay));
        assert_eq!(records[1].ballot, Some(Ballot::Paired));
        assert_eq!(records[1].subject, "3rd reading of Bill C-69");
    }
}
