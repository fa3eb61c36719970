use herald_core::models::ScrapedContent;
use herald_core::traits::{ContentStore, UpsertOutcome};
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn record(url: &str, hash: &str) -> ScrapedContent {
    ScrapedContent {
        job_id: Uuid::new_v4(),
        source_id: "planet".into(),
        url: url.into(),
        normalized_url: url.into(),
        title: "Water board delays dam expansion".into(),
        body: "The regional water board voted on Tuesday.".into(),
        author: Some("Ana Ruiz".into()),
        published_at: None,
        content_hash: hash.into(),
        quality_score: 72,
        fingerprint: None,
    }
}

#[tokio::test]
async fn upsert_inserts_then_reports_duplicates() {
    let (db, _container) = setup_test_db().await;
    let repo = db.content_repo();

    let first = repo
        .upsert_scraped_content(&record("https://planet.example/a", "hash-a"))
        .await
        .unwrap();
    assert!(matches!(first, UpsertOutcome::Inserted(_)));

    // Same hash under a new URL.
    let by_hash = repo
        .upsert_scraped_content(&record("https://planet.example/b", "hash-a"))
        .await
        .unwrap();
    assert_eq!(by_hash, UpsertOutcome::Duplicate);

    // Same URL with a new hash.
    let by_url = repo
        .upsert_scraped_content(&record("https://planet.example/a", "hash-b"))
        .await
        .unwrap();
    assert_eq!(by_url, UpsertOutcome::Duplicate);

    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn existence_checks() {
    let (db, _container) = setup_test_db().await;
    let repo = db.content_repo();
    repo.upsert_scraped_content(&record("https://planet.example/a", "hash-a"))
        .await
        .unwrap();

    assert!(repo.exists_by_hash("hash-a").await.unwrap());
    assert!(!repo.exists_by_hash("hash-z").await.unwrap());
    assert!(repo.exists_by_normalized_url("https://planet.example/a").await.unwrap());
    assert!(!repo.exists_by_normalized_url("https://planet.example/z").await.unwrap());

    let found = repo
        .existing_normalized_urls(&[
            "https://planet.example/a".to_string(),
            "https://planet.example/z".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains("https://planet.example/a"));
    assert!(repo.existing_normalized_urls(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn near_duplicate_uses_hamming_distance() {
    let (db, _container) = setup_test_db().await;
    let repo = db.content_repo();

    // High bit set, so the stored BIGINT is negative.
    let stored: u64 = 0xF000_0000_0000_00FF;
    let mut rec = record("https://planet.example/a", "hash-a");
    rec.fingerprint = Some(stored);
    repo.upsert_scraped_content(&rec).await.unwrap();

    assert_eq!(repo.find_near_duplicate(stored, 3).await.unwrap(), Some(0));
    assert_eq!(repo.find_near_duplicate(stored ^ 0b101, 3).await.unwrap(), Some(2));
    assert_eq!(repo.find_near_duplicate(stored ^ 0xFFFF, 3).await.unwrap(), None);
}
