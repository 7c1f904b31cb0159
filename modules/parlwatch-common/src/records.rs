//! Feed-native records and the resolved rows they become.
//!
//! External records are transient: parsed from a feed, normalized, resolved
//! against canonical members, then discarded once their row is persisted.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a feed refers to a member: an upstream id, a name, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub external_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl MemberRef {
    pub fn by_name(first: &str, last: &str) -> Self {
        Self {
            external_id: None,
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
        }
    }

    pub fn describe(&self) -> String {
        let name = match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(n), None) | (None, Some(n)) => n.clone(),
            (None, None) => "<no name>".to_string(),
        };
        match &self.external_id {
            Some(id) => format!("{name} (id {id})"),
            None => name,
        }
    }
}

// --- Roster ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub external_id: Option<String>,
    pub honorific: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub constituency: String,
    pub region: String,
    pub affiliation: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Final field values for one roster upsert, after smart merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpsert {
    pub external_id: String,
    /// Existing legacy row (no external id yet) this entry should claim.
    pub adopt_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub constituency: String,
    pub region: String,
    pub affiliation: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

// --- Votes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ballot {
    Yea,
    Nay,
    Paired,
    Abstain,
}

impl Ballot {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yea" | "yes" | "pour" => Some(Ballot::Yea),
            "nay" | "no" | "contre" => Some(Ballot::Nay),
            "paired" | "pairé" => Some(Ballot::Paired),
            "abstain" | "abstention" => Some(Ballot::Abstain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Ballot::Yea => "yea",
            Ballot::Nay => "nay",
            Ballot::Paired => "paired",
            Ballot::Abstain => "abstain",
        }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member's ballot in one recorded division.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub parliament: i16,
    pub session: i16,
    pub vote_number: i32,
    pub date: Option<NaiveDate>,
    pub subject: String,
    pub result: String,
    pub member: MemberRef,
    pub ballot: Option<Ballot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRow {
    pub member_id: Uuid,
    pub parliament: i16,
    pub session: i16,
    pub vote_number: i32,
    pub date: Option<NaiveDate>,
    pub subject: String,
    pub result: String,
    pub ballot: Option<Ballot>,
}

// --- Bills ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillRecord {
    pub parliament: i16,
    pub session: i16,
    pub bill_number: String,
    pub title: String,
    pub short_title: Option<String>,
    pub sponsor: Option<MemberRef>,
    pub status: String,
    pub introduced_on: Option<NaiveDate>,
    pub latest_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRow {
    pub parliament: i16,
    pub session: i16,
    pub bill_number: String,
    pub title: String,
    pub short_title: Option<String>,
    /// Optional reference: left unset when the sponsor cannot be resolved.
    pub sponsor_id: Option<Uuid>,
    pub status: String,
    pub introduced_on: Option<NaiveDate>,
    pub latest_activity_at: Option<DateTime<Utc>>,
}

// --- Expenses ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub member: MemberRef,
    pub constituency: String,
    pub fiscal_year: i32,
    pub quarter: i16,
    pub category: String,
    /// `None` when the disclosure cell could not be parsed as money.
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseRow {
    pub member_id: Uuid,
    pub fiscal_year: i32,
    pub quarter: i16,
    pub category: String,
    pub amount_cents: Option<i64>,
}

// --- Petitions ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetitionRecord {
    pub petition_number: String,
    pub title: String,
    pub sponsor: Option<MemberRef>,
    pub status: String,
    pub signatures: Option<i64>,
    pub opened_on: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetitionRow {
    pub petition_number: String,
    pub title: String,
    pub sponsor_id: Option<Uuid>,
    pub status: String,
    pub signatures: Option<i64>,
    pub opened_on: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub url: String,
}
