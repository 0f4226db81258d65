//! SQLite store: upsert classification, counting and persistence

use chrono::NaiveDate;
use racing_backfill::store::{CountFilter, SqliteStore, StoreClient, StoreError, UpsertCounts};
use racing_backfill::NormalizedRecord;
use serde_json::json;
use tempfile::TempDir;

fn record(key: &str, date: Option<NaiveDate>, going: &str) -> NormalizedRecord {
    let mut fields = serde_json::Map::new();
    fields.insert("going".into(), json!(going));
    NormalizedRecord {
        key: key.to_string(),
        record_date: date,
        fields,
    }
}

fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

#[tokio::test]
async fn test_upsert_classifies_inserts_and_updates() {
    let store = SqliteStore::in_memory().await.unwrap();

    let first = store
        .upsert_batch(
            "races",
            &[
                record("r1", ymd(2023, 5, 1), "Good"),
                record("r2", ymd(2023, 5, 1), "Soft"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(first, UpsertCounts { inserted: 2, updated: 0 });

    let second = store
        .upsert_batch(
            "races",
            &[
                record("r2", ymd(2023, 5, 1), "Heavy"),
                record("r3", ymd(2023, 5, 2), "Firm"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(second, UpsertCounts { inserted: 1, updated: 1 });

    assert_eq!(store.count("races", &CountFilter::All).await.unwrap(), 3);
    let payload = store.payload("races", "r2").await.unwrap().unwrap();
    assert_eq!(payload["going"], "Heavy");
    assert!(store.payload("races", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_count_by_year_uses_record_date() {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .upsert_batch(
            "runners",
            &[
                record("a", ymd(2022, 12, 31), "Good"),
                record("b", ymd(2023, 1, 1), "Good"),
                record("c", ymd(2023, 12, 31), "Good"),
                record("d", None, "Good"),
            ],
        )
        .await
        .unwrap();

    let year = |y| CountFilter::year(y).unwrap();
    assert_eq!(store.count("runners", &year(2022)).await.unwrap(), 1);
    assert_eq!(store.count("runners", &year(2023)).await.unwrap(), 2);
    assert_eq!(store.count("runners", &year(2024)).await.unwrap(), 0);
    assert_eq!(store.count("runners", &CountFilter::All).await.unwrap(), 4);
}

#[tokio::test]
async fn test_missing_table_counts_zero_and_bad_names_are_rejected() {
    let store = SqliteStore::in_memory().await.unwrap();
    assert_eq!(store.count("pedigrees", &CountFilter::All).await.unwrap(), 0);
    assert!(store.payload("pedigrees", "x").await.unwrap().is_none());

    let err = store
        .upsert_batch("races; DROP TABLE races", &[record("r1", None, "Good")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTable(_)));
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("racing.sqlite");

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store
            .upsert_batch("horses", &[record("h1", None, "n/a")])
            .await
            .unwrap();
    }

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert_eq!(reopened.count("horses", &CountFilter::All).await.unwrap(), 1);
    let again = reopened
        .upsert_batch("horses", &[record("h1", None, "n/a")])
        .await
        .unwrap();
    assert_eq!(again, UpsertCounts { inserted: 0, updated: 1 });
}
