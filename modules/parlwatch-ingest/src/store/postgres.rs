// Postgres persistence for members, feed records and anomalies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use parlwatch_common::{
    Anomaly, BillRow, CanonicalEntity, EntityStatus, ExpenseRow, MemberUpsert, PetitionRow,
    Upserted, VoteRow,
};

use super::{AnomalySink, IngestStore};

pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    external_id: Option<String>,
    first_name: String,
    last_name: String,
    display_name: String,
    constituency: String,
    region: String,
    affiliation: String,
    email: Option<String>,
    phone: Option<String>,
    is_active: bool,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MemberRow> for CanonicalEntity {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            external_id: row.external_id,
            first_name: row.first_name,
            last_name: row.last_name,
            display_name: row.display_name,
            constituency: row.constituency,
            region: row.region,
            affiliation: row.affiliation,
            email: row.email,
            phone: row.phone,
            is_active: row.is_active,
            status: EntityStatus::parse(&row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn upserted(inserted: bool) -> Upserted {
    if inserted {
        Upserted::Inserted
    } else {
        Upserted::Updated
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IngestStore for PgStore {
    async fn load_entities(&self) -> Result<Vec<CanonicalEntity>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT id, external_id, first_name, last_name, display_name, constituency,
                   region, affiliation, email, phone, is_active, status, created_at, updated_at
            FROM members
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load members")?;

        Ok(rows.into_iter().map(CanonicalEntity::from).collect())
    }

    async fn upsert_member(&self, m: &MemberUpsert) -> Result<Upserted> {
        if let Some(legacy_id) = m.adopt_id {
            sqlx::query(
                r#"
                UPDATE members
                SET external_id = $2, first_name = $3, last_name = $4, display_name = $5,
                    constituency = $6, region = $7, affiliation = $8,
                    email = COALESCE($9, email), phone = COALESCE($10, phone),
                    is_active = true, status = 'active', updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(legacy_id)
            .bind(&m.external_id)
            .bind(&m.first_name)
            .bind(&m.last_name)
            .bind(&m.display_name)
            .bind(&m.constituency)
            .bind(&m.region)
            .bind(&m.affiliation)
            .bind(&m.email)
            .bind(&m.phone)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to adopt member {legacy_id}"))?;
            return Ok(Upserted::Updated);
        }

        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO members
                (id, external_id, first_name, last_name, display_name, constituency,
                 region, affiliation, email, phone, is_active, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, true, 'active')
            ON CONFLICT (external_id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                display_name = EXCLUDED.display_name,
                constituency = EXCLUDED.constituency,
                region = EXCLUDED.region,
                affiliation = EXCLUDED.affiliation,
                email = COALESCE(EXCLUDED.email, members.email),
                phone = COALESCE(EXCLUDED.phone, members.phone),
                is_active = true,
                status = 'active',
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&m.external_id)
        .bind(&m.first_name)
        .bind(&m.last_name)
        .bind(&m.display_name)
        .bind(&m.constituency)
        .bind(&m.region)
        .bind(&m.affiliation)
        .bind(&m.email)
        .bind(&m.phone)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert member {}", m.external_id))?;

        Ok(upserted(inserted))
    }

    async fn mark_departed(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE members
            SET status = 'past', is_active = false, updated_at = now()
            WHERE id = ANY($1) AND status <> 'past'
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .context("Failed to mark departed members")?;

        let departed = result.rows_affected();
        info!(departed, "Marked departed members as past");
        Ok(departed)
    }

    async fn set_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE members SET external_id = $2, updated_at = now() WHERE id = $1 AND external_id IS NULL",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to set external id {external_id} on {id}"))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Member {id} not found or already linked");
        }
        Ok(())
    }

    async fn upsert_vote(&self, row: &VoteRow) -> Result<Upserted> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO votes
                (id, member_id, parliament, session, vote_number, vote_date, subject, result, ballot)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (member_id, parliament, session, vote_number) DO UPDATE SET
                vote_date = EXCLUDED.vote_date,
                subject = EXCLUDED.subject,
                result = EXCLUDED.result,
                ballot = EXCLUDED.ballot,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.member_id)
        .bind(row.parliament)
        .bind(row.session)
        .bind(row.vote_number)
        .bind(row.date)
        .bind(&row.subject)
        .bind(&row.result)
        .bind(row.ballot.map(|b| b.as_str()))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert vote {} for {}", row.vote_number, row.member_id))?;

        Ok(upserted(inserted))
    }

    async fn upsert_bill(&self, row: &BillRow) -> Result<Upserted> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO bills
                (id, parliament, session, bill_number, title, short_title, sponsor_id,
                 status, introduced_on, latest_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (parliament, session, bill_number) DO UPDATE SET
                title = EXCLUDED.title,
                short_title = EXCLUDED.short_title,
                sponsor_id = COALESCE(EXCLUDED.sponsor_id, bills.sponsor_id),
                status = EXCLUDED.status,
                introduced_on = EXCLUDED.introduced_on,
                latest_activity_at = EXCLUDED.latest_activity_at,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.parliament)
        .bind(row.session)
        .bind(&row.bill_number)
        .bind(&row.title)
        .bind(&row.short_title)
        .bind(row.sponsor_id)
        .bind(&row.status)
        .bind(row.introduced_on)
        .bind(row.latest_activity_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert bill {}", row.bill_number))?;

        Ok(upserted(inserted))
    }

    async fn upsert_expense(&self, row: &ExpenseRow) -> Result<Upserted> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO expenses (id, member_id, fiscal_year, quarter, category, amount_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (member_id, fiscal_year, quarter, category) DO UPDATE SET
                amount_cents = EXCLUDED.amount_cents,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.member_id)
        .bind(row.fiscal_year)
        .bind(row.quarter)
        .bind(&row.category)
        .bind(row.amount_cents)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert {} expense for {}", row.category, row.member_id))?;

        Ok(upserted(inserted))
    }

    async fn upsert_petition(&self, row: &PetitionRow) -> Result<Upserted> {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO petitions
                (id, petition_number, title, sponsor_id, status, signatures, opened_on, closed_on, url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (petition_number) DO UPDATE SET
                title = EXCLUDED.title,
                sponsor_id = COALESCE(EXCLUDED.sponsor_id, petitions.sponsor_id),
                status = EXCLUDED.status,
                signatures = COALESCE(EXCLUDED.signatures, petitions.signatures),
                opened_on = COALESCE(EXCLUDED.opened_on, petitions.opened_on),
                closed_on = COALESCE(EXCLUDED.closed_on, petitions.closed_on),
                url = EXCLUDED.url,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.petition_number)
        .bind(&row.title)
        .bind(row.sponsor_id)
        .bind(&row.status)
        .bind(row.signatures)
        .bind(row.opened_on)
        .bind(row.closed_on)
        .bind(&row.url)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert petition {}", row.petition_number))?;

        Ok(upserted(inserted))
    }
}

#[async_trait]
impl AnomalySink for PgStore {
    async fn record(&self, anomaly: &Anomaly) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anomalies
                (id, source_component, external_job_id, category, description,
                 severity, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(anomaly.id)
        .bind(&anomaly.source_component)
        .bind(&anomaly.external_job_id)
        .bind(anomaly.category.to_string())
        .bind(&anomaly.description)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.status.to_string())
        .bind(anomaly.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to record anomaly")?;
        Ok(())
    }
}
