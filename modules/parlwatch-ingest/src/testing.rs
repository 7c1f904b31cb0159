// Test mocks for the ingestion pipeline.
//
// - MockStore (IngestStore + AnomalySink): stateful in-memory tables
// - ScriptedSource (FeedSource): queued primary/fallback responses
// - RecordingTelemetry / RecordingReporter: capture what the orchestrator emits
//
// Plus helpers for constructing members and roster entries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use parlwatch_common::{
    Anomaly, BillRow, CanonicalEntity, EntityStatus, ExpenseRow, MemberUpsert, PersistStats,
    PetitionRow, RosterEntry, ScrapeResult, Severity, Upserted, ValidationOutcome, VoteRow,
};

use crate::observe::{ErrorReporter, IngestEvent, Telemetry};
use crate::orchestrator::{FeedSource, PreparedBatch};
use crate::store::{AnomalySink, IngestStore};
use crate::validate::BatchChecks;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// An active member as it would come back from the store.
pub fn entity(external_id: Option<&str>, first: &str, last: &str, constituency: &str) -> CanonicalEntity {
    let now = Utc::now();
    CanonicalEntity {
        id: Uuid::new_v4(),
        external_id: external_id.map(String::from),
        first_name: first.to_string(),
        last_name: last.to_string(),
        display_name: format!("{first} {last}"),
        constituency: constituency.to_string(),
        region: "Ontario".to_string(),
        affiliation: "Independent".to_string(),
        email: None,
        phone: None,
        is_active: true,
        status: EntityStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

pub fn roster_entry(external_id: Option<&str>, first: &str, last: &str, constituency: &str) -> RosterEntry {
    RosterEntry {
        external_id: external_id.map(String::from),
        honorific: None,
        first_name: first.to_string(),
        last_name: last.to_string(),
        constituency: constituency.to_string(),
        region: "Ontario".to_string(),
        affiliation: "Independent".to_string(),
        email: None,
        phone: None,
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

type VoteKey = (Uuid, i16, i16, i32);
type BillKey = (i16, i16, String);
type ExpenseKey = (Uuid, i32, i16, String);

#[derive(Default)]
struct MockStoreInner {
    members: Vec<CanonicalEntity>,
    votes: HashMap<VoteKey, VoteRow>,
    bills: HashMap<BillKey, BillRow>,
    expenses: HashMap<ExpenseKey, ExpenseRow>,
    petitions: HashMap<String, PetitionRow>,
    anomalies: Vec<Anomaly>,
    failing_external_ids: HashSet<String>,
    fail_loads: bool,
    mark_departed_calls: u32,
}

/// Stateful in-memory store. Thread-safe via interior Mutex.
/// Enforces the same natural keys and member foreign keys as the schema.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<MockStoreInner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<CanonicalEntity>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().members = entities;
        store
    }

    /// Upserts for this external id fail.
    pub fn failing_member(self, external_id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failing_external_ids
            .insert(external_id.to_string());
        self
    }

    /// `load_entities` fails.
    pub fn failing_loads(self) -> Self {
        self.inner.lock().unwrap().fail_loads = true;
        self
    }

    pub fn entities(&self) -> Vec<CanonicalEntity> {
        self.inner.lock().unwrap().members.clone()
    }

    pub fn entity(&self, id: Uuid) -> Option<CanonicalEntity> {
        self.inner.lock().unwrap().members.iter().find(|m| m.id == id).cloned()
    }

    pub fn entity_by_external_id(&self, external_id: &str) -> Option<CanonicalEntity> {
        self.inner
            .lock()
            .unwrap()
            .members
            .iter()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().members.iter().filter(|m| m.is_active).count()
    }

    pub fn votes_for_member(&self, member_id: Uuid) -> Vec<VoteRow> {
        let mut votes: Vec<VoteRow> = self
            .inner
            .lock()
            .unwrap()
            .votes
            .values()
            .filter(|v| v.member_id == member_id)
            .cloned()
            .collect();
        votes.sort_by_key(|v| v.vote_number);
        votes
    }

    pub fn vote_count(&self) -> usize {
        self.inner.lock().unwrap().votes.len()
    }

    pub fn bills(&self) -> Vec<BillRow> {
        self.inner.lock().unwrap().bills.values().cloned().collect()
    }

    pub fn expenses(&self) -> Vec<ExpenseRow> {
        self.inner.lock().unwrap().expenses.values().cloned().collect()
    }

    pub fn petitions(&self) -> Vec<PetitionRow> {
        self.inner.lock().unwrap().petitions.values().cloned().collect()
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.inner.lock().unwrap().anomalies.clone()
    }

    pub fn mark_departed_calls(&self) -> u32 {
        self.inner.lock().unwrap().mark_departed_calls
    }
}

fn require_member(inner: &MockStoreInner, id: Uuid) -> Result<()> {
    if !inner.members.iter().any(|m| m.id == id) {
        bail!("foreign key violation: member {id} does not exist");
    }
    Ok(())
}

fn upsert_keyed<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, value: V) -> Upserted {
    match map.insert(key, value) {
        Some(_) => Upserted::Updated,
        None => Upserted::Inserted,
    }
}

fn apply_member(target: &mut CanonicalEntity, m: &MemberUpsert) {
    target.external_id = Some(m.external_id.clone());
    target.first_name = m.first_name.clone();
    target.last_name = m.last_name.clone();
    target.display_name = m.display_name.clone();
    target.constituency = m.constituency.clone();
    target.region = m.region.clone();
    target.affiliation = m.affiliation.clone();
    if m.email.is_some() {
        target.email = m.email.clone();
    }
    if m.phone.is_some() {
        target.phone = m.phone.clone();
    }
    target.is_active = true;
    target.status = EntityStatus::Active;
    target.updated_at = Utc::now();
}

#[async_trait]
impl IngestStore for MockStore {
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_loads {
            bail!("database error: connection refused");
        }
        Ok(inner.members.clone())
    }

    async fn upsert_member(&self, m: &MemberUpsert) -> Result<Upserted> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_external_ids.contains(&m.external_id) {
            bail!("simulated write failure for {}", m.external_id);
        }

        if let Some(id) = m.adopt_id {
            let Some(target) = inner.members.iter_mut().find(|e| e.id == id) else {
                bail!("member {id} not found");
            };
            apply_member(target, m);
            return Ok(Upserted::Updated);
        }

        if let Some(target) = inner
            .members
            .iter_mut()
            .find(|e| e.external_id.as_deref() == Some(m.external_id.as_str()))
        {
            apply_member(target, m);
            return Ok(Upserted::Updated);
        }

        let mut created = entity(Some(&m.external_id), &m.first_name, &m.last_name, &m.constituency);
        apply_member(&mut created, m);
        inner.members.push(created);
        Ok(Upserted::Inserted)
    }

    async fn mark_departed(&self, ids: &[Uuid]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.mark_departed_calls += 1;
        let mut departed = 0;
        for member in inner.members.iter_mut() {
            if ids.contains(&member.id) && member.status != EntityStatus::Past {
                member.status = EntityStatus::Past;
                member.is_active = false;
                member.updated_at = Utc::now();
                departed += 1;
            }
        }
        Ok(departed)
    }

    async fn set_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .members
            .iter()
            .any(|m| m.external_id.as_deref() == Some(external_id))
        {
            bail!("duplicate external id {external_id}");
        }
        match inner.members.iter_mut().find(|m| m.id == id) {
            Some(member) if member.external_id.is_none() => {
                member.external_id = Some(external_id.to_string());
                Ok(())
            }
            _ => bail!("Member {id} not found or already linked"),
        }
    }

    async fn upsert_vote(&self, row: &VoteRow) -> Result<Upserted> {
        let mut inner = self.inner.lock().unwrap();
        require_member(&inner, row.member_id)?;
        let key = (row.member_id, row.parliament, row.session, row.vote_number);
        Ok(upsert_keyed(&mut inner.votes, key, row.clone()))
    }

    async fn upsert_bill(&self, row: &BillRow) -> Result<Upserted> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sponsor) = row.sponsor_id {
            require_member(&inner, sponsor)?;
        }
        let key = (row.parliament, row.session, row.bill_number.clone());
        let mut row = row.clone();
        if let Some(stored) = inner.bills.get(&key) {
            row.sponsor_id = row.sponsor_id.or(stored.sponsor_id);
        }
        Ok(upsert_keyed(&mut inner.bills, key, row))
    }

    async fn upsert_expense(&self, row: &ExpenseRow) -> Result<Upserted> {
        let mut inner = self.inner.lock().unwrap();
        require_member(&inner, row.member_id)?;
        let key = (row.member_id, row.fiscal_year, row.quarter, row.category.clone());
        Ok(upsert_keyed(&mut inner.expenses, key, row.clone()))
    }

    async fn upsert_petition(&self, row: &PetitionRow) -> Result<Upserted> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sponsor) = row.sponsor_id {
            require_member(&inner, sponsor)?;
        }
        let mut row = row.clone();
        if let Some(stored) = inner.petitions.get(&row.petition_number) {
            row.sponsor_id = row.sponsor_id.or(stored.sponsor_id);
            row.signatures = row.signatures.or(stored.signatures);
            row.opened_on = row.opened_on.or(stored.opened_on);
            row.closed_on = row.closed_on.or(stored.closed_on);
        }
        Ok(upsert_keyed(&mut inner.petitions, row.petition_number.clone(), row))
    }
}

#[async_trait]
impl AnomalySink for MockStore {
    async fn record(&self, anomaly: &Anomaly) -> Result<()> {
        self.inner.lock().unwrap().anomalies.push(anomaly.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Feed source whose extraction results are queued up front.
///
/// Records are plain strings. An empty string counts as a record with a
/// missing field; repeated strings are duplicate keys. Once the primary
/// queue is drained every further primary attempt fails.
pub struct ScriptedSource {
    name: String,
    primary: Mutex<VecDeque<ScrapeResult<Vec<String>>>>,
    fallback: Mutex<Option<ScrapeResult<Vec<String>>>>,
    primary_delay: Option<Duration>,
    prepare_error: Option<String>,
    primary_calls: AtomicU32,
    fallback_calls: AtomicU32,
    cleanups: AtomicU32,
    persisted: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            primary_delay: None,
            prepare_error: None,
            primary_calls: AtomicU32::new(0),
            fallback_calls: AtomicU32::new(0),
            cleanups: AtomicU32::new(0),
            persisted: Mutex::new(Vec::new()),
        }
    }

    pub fn primary_ok(self, records: &[&str]) -> Self {
        let data = records.iter().map(|r| r.to_string()).collect();
        self.primary
            .lock()
            .unwrap()
            .push_back(ScrapeResult::ok(data, "https://feed.test/primary"));
        self
    }

    pub fn primary_err(self, error: &str) -> Self {
        self.primary
            .lock()
            .unwrap()
            .push_back(ScrapeResult::failed(error, None));
        self
    }

    pub fn fallback_ok(self, records: &[&str]) -> Self {
        let data = records.iter().map(|r| r.to_string()).collect();
        *self.fallback.lock().unwrap() = Some(ScrapeResult::ok(data, "https://feed.test/fallback"));
        self
    }

    pub fn fallback_err(self, error: &str) -> Self {
        *self.fallback.lock().unwrap() = Some(ScrapeResult::failed(error, None));
        self
    }

    /// Every primary attempt sleeps this long before answering.
    pub fn slow_primary(mut self, delay: Duration) -> Self {
        self.primary_delay = Some(delay);
        self
    }

    pub fn failing_prepare(mut self, error: &str) -> Self {
        self.prepare_error = Some(error.to_string());
        self
    }

    pub fn primary_calls(&self) -> u32 {
        self.primary_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> u32 {
        self.fallback_calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> u32 {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    type Record = String;
    type Resolved = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> String {
        format!("https://feed.test/{}", self.name)
    }

    async fn primary_extract(&self) -> ScrapeResult<Vec<String>> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.primary_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.primary.lock().unwrap().pop_front();
        next.unwrap_or_else(|| ScrapeResult::failed("connection refused", None))
    }

    async fn fallback_extract(&self) -> ScrapeResult<Vec<String>> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fallback.lock().unwrap().take();
        scripted.unwrap_or_else(|| ScrapeResult::failed("no fallback scripted", None))
    }

    async fn prepare(&self, records: Vec<String>) -> Result<PreparedBatch<String>> {
        if let Some(error) = &self.prepare_error {
            bail!("{error}");
        }
        Ok(PreparedBatch::new(records))
    }

    fn validate(&self, batch: &PreparedBatch<String>) -> ValidationOutcome {
        BatchChecks::new("scripted records", &batch.records)
            .missing("value", |r| r.is_empty())
            .duplicates("value", |r| r.clone())
            .finish()
    }

    async fn persist(&self, batch: PreparedBatch<String>) -> PersistStats {
        let mut stats = PersistStats::default();
        let mut persisted = self.persisted.lock().unwrap();
        for record in batch.records {
            persisted.push(record);
            stats.record(Upserted::Inserted);
        }
        stats
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<IngestEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<IngestEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(IngestEvent::name).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: IngestEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, Severity, String)>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<(String, Severity, String)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorReporter for RecordingReporter {
    async fn report(&self, source: &str, severity: Severity, message: &str) -> anyhow::Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((source.to_string(), severity, message.to_string()));
        Ok(())
    }
}
