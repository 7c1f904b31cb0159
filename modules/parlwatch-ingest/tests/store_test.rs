//! Postgres store round trips.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::NaiveDate;
use uuid::Uuid;

use parlwatch_common::{Ballot, EntityStatus, MemberUpsert, Upserted, VoteRow};
use parlwatch_ingest::store::{IngestStore, PgStore};

async fn test_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let store = PgStore::connect(&url).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn member(external_id: &str, last_name: &str) -> MemberUpsert {
    MemberUpsert {
        external_id: external_id.to_string(),
        adopt_id: None,
        first_name: "Test".to_string(),
        last_name: last_name.to_string(),
        display_name: format!("Test {last_name}"),
        constituency: "Test Riding".to_string(),
        region: "Ontario".to_string(),
        affiliation: "Independent".to_string(),
        email: Some(format!("{external_id}@example.test")),
        phone: None,
    }
}

async fn member_id(store: &PgStore, external_id: &str) -> Uuid {
    store
        .load_entities()
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.external_id.as_deref() == Some(external_id))
        .map(|m| m.id)
        .unwrap()
}

#[tokio::test]
async fn member_upsert_is_idempotent() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_TEST_URL not set, skipping");
        return;
    };
    let ext = format!("test-{}", Uuid::new_v4());

    assert_eq!(store.upsert_member(&member(&ext, "First")).await.unwrap(), Upserted::Inserted);

    let mut again = member(&ext, "Second");
    again.email = None;
    assert_eq!(store.upsert_member(&again).await.unwrap(), Upserted::Updated);

    let stored = store
        .load_entities()
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.external_id.as_deref() == Some(ext.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].last_name, "Second");
    assert_eq!(stored[0].email.as_deref(), Some(format!("{ext}@example.test").as_str()));
}

#[tokio::test]
async fn departed_member_keeps_votes() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_TEST_URL not set, skipping");
        return;
    };
    let ext = format!("test-{}", Uuid::new_v4());
    store.upsert_member(&member(&ext, "Departing")).await.unwrap();
    let id = member_id(&store, &ext).await;

    let vote = VoteRow {
        member_id: id,
        parliament: 44,
        session: 1,
        vote_number: 9001,
        date: NaiveDate::from_ymd_opt(2024, 6, 19),
        subject: "Test motion".to_string(),
        result: "Agreed To".to_string(),
        ballot: Some(Ballot::Yea),
    };
    assert_eq!(store.upsert_vote(&vote).await.unwrap(), Upserted::Inserted);
    assert_eq!(store.upsert_vote(&vote).await.unwrap(), Upserted::Updated);

    assert_eq!(store.mark_departed(&[id]).await.unwrap(), 1);
    assert_eq!(store.mark_departed(&[id]).await.unwrap(), 0);

    let departed = store
        .load_entities()
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.id == id)
        .unwrap();
    assert_eq!(departed.status, EntityStatus::Past);

    let votes: i64 = sqlx::query_scalar("SELECT count(*) FROM votes WHERE member_id = $1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(votes, 1);
}

#[tokio::test]
async fn vote_for_unknown_member_is_rejected() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_TEST_URL not set, skipping");
        return;
    };
    let vote = VoteRow {
        member_id: Uuid::new_v4(),
        parliament: 44,
        session: 1,
        vote_number: 1,
        date: None,
        subject: String::new(),
        result: String::new(),
        ballot: None,
    };
    assert!(store.upsert_vote(&vote).await.is_err());
}
