//! SQLite adapter round trip against a throwaway database file.

use chrono::{Duration, TimeZone, Utc};
use tokio_stream::StreamExt;
use vizsprints_core::{AnalyticsError, AnalyticsResult, Event, SubscriptionTier, User, Variant};
use vizsprints_store::{EventFilter, EventStore, SqliteEventStore, UserFilter};

struct TempDb {
    store: SqliteEventStore,
}

impl TempDb {
    fn new() -> Self {
        let db = Self::empty();
        db.store.init_schema().unwrap();
        db
    }

    /// A path with no schema yet.
    fn empty() -> Self {
        let path = std::env::temp_dir().join(format!("vizsprints-{}.db", uuid::Uuid::new_v4()));
        Self {
            store: SqliteEventStore::new(path).with_channel_capacity(4),
        }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.store.path());
    }
}

fn seed(store: &SqliteEventStore) {
    let base = Utc.with_ymd_and_hms(2023, 1, 1, 9, 0, 0).unwrap();
    let mut users = vec![
        User::new("u_0001", base, Variant::A).with_tier(SubscriptionTier::Premium),
        User::new("u_0002", base, Variant::B),
        User::new("u_0003", base, Variant::B).with_tier(SubscriptionTier::Enterprise),
    ];
    users[0].country = Some("US".to_string());
    users[0].device = Some("Desktop".to_string());
    users[2].country = Some("US".to_string());
    users[2].device = Some("Mobile".to_string());

    let mut events = Vec::new();
    for day in 0..4 {
        for user in &users {
            events.push(Event::new(
                user.user_id.clone(),
                "view_dashboard",
                base + Duration::days(day),
            ));
        }
    }
    store.insert_users(&users).unwrap();
    store.insert_events(&events).unwrap();
}

async fn collect_events(store: &SqliteEventStore, filter: &EventFilter) -> Vec<Event> {
    store
        .query(filter)
        .collect::<AnalyticsResult<Vec<_>>>()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_streams_all_events_in_insert_order() {
    let db = TempDb::new();
    seed(&db.store);

    let events = collect_events(&db.store, &EventFilter::new()).await;
    assert_eq!(events.len(), 12);
    assert_eq!(events[0].user_id, "u_0001");
    assert_eq!(events[0].variant, Some(Variant::A));
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_filters_are_pushed_down() {
    let db = TempDb::new();
    seed(&db.store);

    let by_variant = collect_events(&db.store, &EventFilter::new().for_variant(Variant::B)).await;
    assert_eq!(by_variant.len(), 8);

    let sampled = collect_events(&db.store, &EventFilter::new().with_limit(Some(1))).await;
    assert_eq!(sampled.len(), 4);
    assert!(sampled.iter().all(|e| e.user_id == "u_0001"));

    let capped = collect_events(&db.store, &EventFilter::new().with_event_limit(Some(2))).await;
    assert_eq!(capped.len(), 6);

    let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2023, 1, 3, 23, 59, 59).unwrap();
    let windowed = collect_events(&db.store, &EventFilter::new().between(start, end)).await;
    assert_eq!(windowed.len(), 6);
}

#[tokio::test]
async fn test_users_round_trip() {
    let db = TempDb::new();
    seed(&db.store);

    let users: Vec<User> = db
        .store
        .users(&UserFilter::new())
        .collect::<AnalyticsResult<Vec<_>>>()
        .await
        .unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(users[0].subscription_status, SubscriptionTier::Premium);
    assert_eq!(users[2].ab_variant, Variant::B);
}

#[tokio::test]
async fn test_missing_database_is_data_unavailable() {
    let path = std::env::temp_dir().join(format!("missing-{}.db", uuid::Uuid::new_v4()));
    let store = SqliteEventStore::new(path);

    let result = store
        .query(&EventFilter::new())
        .collect::<AnalyticsResult<Vec<_>>>()
        .await;
    assert!(matches!(result, Err(AnalyticsError::DataUnavailable(_))));
}

async fn collect_users(store: &SqliteEventStore, filter: &UserFilter) -> Vec<User> {
    store
        .users(filter)
        .collect::<AnalyticsResult<Vec<_>>>()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_user_listing_filters() {
    let db = TempDb::new();
    seed(&db.store);

    let us = collect_users(&db.store, &UserFilter::new().in_country("US")).await;
    let ids: Vec<&str> = us.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(ids, vec!["u_0001", "u_0003"]);

    let mobile = collect_users(&db.store, &UserFilter::new().in_country("US").on_device("Mobile")).await;
    assert_eq!(mobile.len(), 1);
    assert_eq!(mobile[0].user_id, "u_0003");

    let free = collect_users(&db.store, &UserFilter::new().on_tier(SubscriptionTier::Free)).await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].user_id, "u_0002");

    let first_us = collect_users(&db.store, &UserFilter::new().in_country("US").with_limit(Some(1))).await;
    assert_eq!(first_us.len(), 1);
    assert_eq!(first_us[0].user_id, "u_0001");
}

#[tokio::test]
async fn test_event_listing_filters() {
    let db = TempDb::new();
    seed(&db.store);

    let one_user = collect_events(&db.store, &EventFilter::new().for_user("u_0002")).await;
    assert_eq!(one_user.len(), 4);
    assert!(one_user.iter().all(|e| e.user_id == "u_0002"));

    let missing = collect_events(&db.store, &EventFilter::new().named("complete_task")).await;
    assert!(missing.is_empty());

    let from = Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap();
    let open_ended = collect_events(
        &db.store,
        &EventFilter::new().for_user("u_0003").within(Some(from), None),
    )
    .await;
    assert_eq!(open_ended.len(), 2);
}

/// Tables as the legacy CSV importer writes them: no `events.variant`.
fn create_legacy_tables(path: &std::path::Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (user_id TEXT, joined_at TEXT, device TEXT, country TEXT,
                             subscription_status TEXT, ab_variant TEXT);
         CREATE TABLE events (event_id TEXT, user_id TEXT, event_name TEXT, timestamp TEXT,
                              metadata TEXT);
         INSERT INTO users VALUES ('u_0001', '2023-01-01T09:00:00Z', 'Mobile', 'US', 'Free', 'A');
         INSERT INTO users VALUES ('u_0002', '2023-01-02T09:00:00Z', 'Tablet', 'IN', 'Premium', 'B');
         INSERT INTO events VALUES ('e_1', 'u_0001', 'signup_success', '2023-01-01T09:01:00Z', '{\"source\": \"ads\"}');
         INSERT INTO events VALUES ('e_2', 'u_0002', 'signup_success', '2023-01-02T09:03:00Z', '{}');
         INSERT INTO events VALUES ('e_3', 'u_0002', 'view_dashboard', '2023-01-02T09:40:00Z', '{}');",
    )
    .unwrap();
}

#[tokio::test]
async fn test_legacy_database_gains_variant_column() {
    let db = TempDb::empty();
    create_legacy_tables(db.store.path());

    db.store.init_schema().unwrap();
    db.store.init_schema().unwrap();

    let events = collect_events(&db.store, &EventFilter::new()).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].variant, Some(Variant::A));
    assert_eq!(events[2].variant, Some(Variant::B));

    let arm_b = collect_events(&db.store, &EventFilter::new().for_variant(Variant::B)).await;
    assert_eq!(arm_b.len(), 2);

    let users = collect_users(&db.store, &UserFilter::new()).await;
    assert_eq!(users[1].subscription_status, SubscriptionTier::Premium);
    assert_eq!(users[1].device.as_deref(), Some("Tablet"));
}

#[tokio::test]
async fn test_open_stream_holds_off_writers_until_drained() {
    let db = TempDb::new();
    seed(&db.store);

    let insert = "INSERT INTO events (event_id, user_id, event_name, timestamp)
                  VALUES ('late', 'u_0001', 'invite_user', '2023-02-01T00:00:00Z')";
    let writer = rusqlite::Connection::open(db.store.path()).unwrap();
    writer.busy_timeout(std::time::Duration::ZERO).unwrap();

    // The cursor stays parked on the full channel while rows remain unread.
    let mut stream = db.store.query(&EventFilter::new());
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.user_id, "u_0001");
    assert!(writer.execute(insert, []).is_err());

    let rest: Vec<Event> = stream.collect::<AnalyticsResult<Vec<_>>>().await.unwrap();
    assert_eq!(rest.len(), 11);

    writer.execute(insert, []).unwrap();
    let after = collect_events(&db.store, &EventFilter::new()).await;
    assert_eq!(after.len(), 13);
}
