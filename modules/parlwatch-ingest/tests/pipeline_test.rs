//! Dependent feeds: resolution, validation and idempotent persistence
//! through the real sources, without touching the network.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use parlwatch_common::{Ballot, BillRecord, ExpenseRecord, MemberRef, PetitionRecord, VoteRecord};
use parlwatch_ingest::fetch::FeedClient;
use parlwatch_ingest::orchestrator::FeedSource;
use parlwatch_ingest::sources::expenses::ReportingPeriod;
use parlwatch_ingest::sources::{BillsSource, ExpensesSource, PetitionsSource, VotesSource};
use parlwatch_ingest::testing::{entity, MockStore};

fn client() -> FeedClient {
    FeedClient::new(Duration::from_secs(1)).unwrap()
}

fn vote_record(member: MemberRef, number: i32, ballot: Ballot) -> VoteRecord {
    VoteRecord {
        parliament: 44,
        session: 1,
        vote_number: number,
        date: NaiveDate::from_ymd_opt(2024, 6, 19),
        subject: "Opposition Motion".to_string(),
        result: "Negatived".to_string(),
        member,
        ballot: Some(ballot),
    }
}

fn store_with_members() -> (Arc<MockStore>, uuid::Uuid, uuid::Uuid) {
    let may = entity(Some("2897"), "Elizabeth", "May", "Saanich—Gulf Islands");
    let legacy = entity(None, "Mark", "Gerretsen", "Kingston and the Islands");
    let (may_id, legacy_id) = (may.id, legacy.id);
    (Arc::new(MockStore::with_entities(vec![may, legacy])), may_id, legacy_id)
}

#[tokio::test]
async fn votes_resolve_by_id_then_name_and_drop_the_rest() {
    let (store, may_id, legacy_id) = store_with_members();
    let source = VotesSource::new(client(), store.clone(), "https://example.test", (44, 1), 10);

    let records = vec![
        vote_record(
            MemberRef {
                external_id: Some("2897".into()),
                first_name: None,
                last_name: None,
            },
            812,
            Ballot::Nay,
        ),
        vote_record(
            MemberRef {
                external_id: Some("88802".into()),
                first_name: Some("Mark".into()),
                last_name: Some("Gerretsen".into()),
            },
            812,
            Ballot::Yea,
        ),
        vote_record(MemberRef::by_name("Nobody", "Known"), 812, Ballot::Yea),
    ];

    let batch = source.prepare(records).await.unwrap();
    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.dropped.len(), 1);
    assert_eq!(batch.records[0].member_id, may_id);
    assert_eq!(batch.records[1].member_id, legacy_id);

    let outcome = source.validate(&batch);
    assert!(!outcome.is_valid);
    assert_eq!(outcome.anomalies.len(), 1);
    assert!(outcome.anomalies[0].contains("missing member reference"));

    let stats = source.persist(batch).await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(store.votes_for_member(may_id)[0].ballot, Some(Ballot::Nay));
}

#[tokio::test]
async fn replaying_a_batch_updates_in_place() {
    let (store, may_id, _) = store_with_members();
    let source = VotesSource::new(client(), store.clone(), "https://example.test", (44, 1), 10);
    let records = || {
        (800..805)
            .map(|n| vote_record(MemberRef::by_name("Elizabeth", "May"), n, Ballot::Yea))
            .collect::<Vec<_>>()
    };

    let first = source.persist(source.prepare(records()).await.unwrap()).await;
    let second = source.persist(source.prepare(records()).await.unwrap()).await;

    assert_eq!(first.inserted, 5);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 5);
    assert_eq!(store.vote_count(), 5);
    assert_eq!(store.votes_for_member(may_id).len(), 5);
}

#[tokio::test]
async fn bills_keep_unresolved_sponsors_as_null() {
    let (store, may_id, _) = store_with_members();
    let source = BillsSource::new(client(), store.clone(), "https://example.test", "44-1");

    let bill = |number: &str, sponsor: Option<MemberRef>| BillRecord {
        parliament: 44,
        session: 1,
        bill_number: number.to_string(),
        title: format!("An Act respecting {number}"),
        short_title: None,
        sponsor,
        status: "At second reading".to_string(),
        introduced_on: NaiveDate::from_ymd_opt(2024, 2, 1),
        latest_activity_at: None,
    };
    let records = vec![
        bill("C-301", Some(MemberRef::by_name("Elizabeth", "May"))),
        bill("C-302", Some(MemberRef::by_name("Former", "Member"))),
        bill("S-210", None),
    ];

    let batch = source.prepare(records).await.unwrap();
    assert!(batch.dropped.is_empty());
    assert!(source.validate(&batch).is_valid);

    let stats = source.persist(batch).await;
    assert_eq!(stats.inserted, 3);

    let mut bills = store.bills();
    bills.sort_by(|a, b| a.bill_number.cmp(&b.bill_number));
    assert_eq!(bills[0].sponsor_id, Some(may_id));
    assert_eq!(bills[1].sponsor_id, None);
    assert_eq!(bills[2].sponsor_id, None);
}

#[tokio::test]
async fn expenses_flag_out_of_range_amounts() {
    let (store, _, legacy_id) = store_with_members();
    let period = ReportingPeriod {
        fiscal_year: 2024,
        quarter: 2,
    };
    let source = ExpensesSource::new(client(), store.clone(), "https://example.test/q2.csv", period);

    let line = |category: &str, amount: Option<i64>| ExpenseRecord {
        member: MemberRef::by_name("Mark", "Gerretsen"),
        constituency: "Kingston and the Islands".to_string(),
        fiscal_year: 2024,
        quarter: 2,
        category: category.to_string(),
        amount_cents: amount,
    };
    let records = vec![
        line("salaries", Some(8_512_345)),
        line("travel", Some(-500)),
        line("hospitality", Some(250_000_000)),
        line("contracts", Some(0)),
    ];

    let batch = source.prepare(records).await.unwrap();
    let outcome = source.validate(&batch);
    assert!(!outcome.is_valid);
    assert!(outcome.anomalies.iter().any(|a| a.contains("negative amount")));
    assert!(outcome.anomalies.iter().any(|a| a.contains("implausibly large")));

    let stats = source.persist(batch).await;
    assert_eq!(stats.inserted, 4);
    assert!(store.expenses().iter().all(|e| e.member_id == legacy_id));
}

#[tokio::test]
async fn petitions_without_a_number_are_dropped() {
    let (store, may_id, _) = store_with_members();
    let source = PetitionsSource::new(client(), store.clone(), "https://example.test/rss");

    let petition = |number: &str, signatures: Option<i64>| PetitionRecord {
        petition_number: number.to_string(),
        title: "Environment".to_string(),
        sponsor: Some(MemberRef::by_name("Elizabeth", "May")),
        status: "Open for signature".to_string(),
        signatures,
        opened_on: NaiveDate::from_ymd_opt(2024, 6, 3),
        closed_on: None,
        url: format!("https://example.test/{number}"),
    };
    let records = vec![petition("e-4512", Some(1234)), petition("", Some(10))];

    let batch = source.prepare(records).await.unwrap();
    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.dropped.len(), 1);
    assert_eq!(batch.records[0].sponsor_id, Some(may_id));

    let outcome = source.validate(&batch);
    assert_eq!(outcome.anomalies.len(), 1);
    assert!(outcome.anomalies[0].contains("missing petition number"));

    source.persist(batch).await;
    assert_eq!(store.petitions().len(), 1);
}

#[tokio::test]
async fn store_outage_surfaces_as_a_prepare_error() {
    let store = Arc::new(MockStore::new().failing_loads());
    let source = BillsSource::new(client(), store, "https://example.test", "44-1");

    let err = source.prepare(Vec::new()).await.unwrap_err();
    assert!(format!("{err:#}").contains("database error"));
}
