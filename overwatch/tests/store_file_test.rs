//! On-disk evidence store: concurrent writers and reopen durability.

use std::sync::Arc;

use chrono::Utc;
use overwatch::store::EvidenceStore;
use shared_types::NewEvidence;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("evidence.db");
    let store = Arc::new(EvidenceStore::open(&path).await.unwrap());
    let query_id = store.put_query("q", "1. Q?").await.unwrap();

    let mut writers = JoinSet::new();
    for i in 0..40 {
        let store = store.clone();
        writers.spawn(async move {
            // Every URL is written twice; the second write must win.
            let url = format!("https://site{}.test/", i % 20);
            let evidence = NewEvidence::new(url, format!("- fact {i}"), Utc::now(), "site.test");
            store.put_evidence(query_id, &evidence).await
        });
    }
    while let Some(joined) = writers.join_next().await {
        joined.unwrap().unwrap();
    }

    assert_eq!(store.evidence_count(query_id).await.unwrap(), 20);
    store.close().await;
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.db");

    let store = EvidenceStore::open(&path).await.unwrap();
    let query_id = store.put_query("bivol", "1. Who won?").await.unwrap();
    store
        .put_evidence(
            query_id,
            &NewEvidence::new("https://a.test/", "- Bivol won", Utc::now(), "a.test"),
        )
        .await
        .unwrap();
    store.close().await;

    let reopened = EvidenceStore::open(&path).await.unwrap();
    let latest = reopened.latest_query().await.unwrap();
    assert_eq!(latest.id, query_id);
    assert_eq!(latest.checklist, "1. Who won?");
    let rows = reopened.all_evidence().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].summary, "- Bivol won");
    reopened.close().await;
}
