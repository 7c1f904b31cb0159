//! Persistence seams.
//!
//! Every write is an upsert keyed by the record's natural key, so re-running
//! an ingestion over the same feed content converges on the same rows.

pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use parlwatch_common::{
    Anomaly, BillRow, CanonicalEntity, ExpenseRow, MemberUpsert, PetitionRow, Upserted, VoteRow,
};

pub use postgres::PgStore;

/// Canonical member and record storage.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Every member, active and past, in stable creation order.
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>>;

    /// Insert or update a member by external id. When `adopt_id` is set the
    /// legacy row with that id claims the external id instead of a new row
    /// being created. Always leaves the member `active`.
    async fn upsert_member(&self, member: &MemberUpsert) -> Result<Upserted>;

    /// Transition members to `past` in one statement. Never deletes.
    async fn mark_departed(&self, ids: &[Uuid]) -> Result<u64>;

    async fn set_external_id(&self, id: Uuid, external_id: &str) -> Result<()>;

    async fn upsert_vote(&self, row: &VoteRow) -> Result<Upserted>;
    async fn upsert_bill(&self, row: &BillRow) -> Result<Upserted>;
    async fn upsert_expense(&self, row: &ExpenseRow) -> Result<Upserted>;
    async fn upsert_petition(&self, row: &PetitionRow) -> Result<Upserted>;
}

/// Append-only destination for flagged anomalies.
#[async_trait]
pub trait AnomalySink: Send + Sync {
    async fn record(&self, anomaly: &Anomaly) -> Result<()>;
}
