//! Coverage merge tests against a recording store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::json;

use coverage_compactor::merge::{CoverageMerger, MergeOutcome};
use coverage_compactor::model::SampleDescriptor;
use coverage_core::kv::KvStore;
use coverage_test_utils::{OpKind, TracingKvStore, read_coverage, seed_coverage};

fn sample(key: &str, time: i64, path: &[&str]) -> SampleDescriptor {
    SampleDescriptor {
        key: key.to_string(),
        time,
        path: path.iter().map(|p| (*p).to_string()).collect(),
        stored_time: None,
    }
}

fn history_record(time: i64) -> serde_json::Value {
    json!({
        "time": time,
        "heard": 1,
        "lost": 0,
        "lastHeard": time,
        "repeaters": [format!("R{time}")]
    })
}

#[tokio::test]
async fn merge_into_empty_entry() {
    let store = TracingKvStore::new();
    let merger = CoverageMerger::new(&store, 15);

    let outcome = merger
        .merge(
            "abc123",
            &[sample("abc123-1", 100, &["A"]), sample("abc123-2", 200, &[])],
        )
        .await
        .unwrap();

    match outcome {
        MergeOutcome::Merged(summary) => {
            assert_eq!(summary.updated, 200);
            assert_eq!(summary.contributed, 2);
            assert_eq!(summary.retained, 1);
            assert_eq!(summary.evicted, 0);
        }
        MergeOutcome::Unchanged => panic!("expected a write"),
    }

    let (history, metadata) = read_coverage(&store, "abc123").await.unwrap();
    assert_eq!(
        history,
        json!([{"time": 200, "heard": 1, "lost": 1, "lastHeard": 100, "repeaters": ["A"]}])
    );
    assert_eq!(
        metadata,
        json!({"heard": 1, "lost": 1, "lastHeard": 100, "updated": 200, "hitRepeaters": ["a"]})
    );
}

#[tokio::test]
async fn merge_below_watermark_writes_nothing() {
    let store = TracingKvStore::new();
    seed_coverage(
        &store,
        "abc123",
        &json!([history_record(200)]),
        json!({"heard": 1, "lost": 0, "lastHeard": 200, "updated": 200, "hitRepeaters": ["r200"]}),
    )
    .await;
    store.clear_operations();

    let merger = CoverageMerger::new(&store, 15);
    let outcome = merger
        .merge("abc123", &[sample("abc123-9", 150, &["B"])])
        .await
        .unwrap();

    assert_eq!(outcome, MergeOutcome::Unchanged);
    assert!(store.operations_of(OpKind::Put).is_empty());

    let (history, metadata) = read_coverage(&store, "abc123").await.unwrap();
    assert_eq!(history, json!([history_record(200)]));
    assert_eq!(metadata["updated"], json!(200));
}

#[tokio::test]
async fn merge_evicts_oldest_when_full() {
    let store = TracingKvStore::new();
    let history: Vec<_> = (1..=15).map(|i| history_record(i * 10)).collect();
    seed_coverage(
        &store,
        "abc123",
        &json!(history),
        json!({"heard": 15, "lost": 0, "lastHeard": 150, "updated": 150, "hitRepeaters": ["r10"]}),
    )
    .await;

    let merger = CoverageMerger::new(&store, 15);
    merger
        .merge("abc123", &[sample("abc123-x", 500, &["New"])])
        .await
        .unwrap();

    let (history, metadata) = read_coverage(&store, "abc123").await.unwrap();
    let times: Vec<i64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["time"].as_i64().unwrap())
        .collect();

    assert_eq!(times.len(), 15);
    assert!(!times.contains(&10));
    assert!(times.contains(&500));
    assert_eq!(metadata["updated"], json!(500));
    assert_eq!(metadata["heard"], json!(15));

    let hit: Vec<&str> = metadata["hitRepeaters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(hit.contains(&"r10"), "evicted repeater stays in hitRepeaters");
    assert!(hit.contains(&"new"));
}

#[tokio::test]
async fn merging_same_batch_twice_writes_once() {
    let store = TracingKvStore::new();
    let merger = CoverageMerger::new(&store, 15);
    let batch = [sample("abc123-1", 100, &["A"]), sample("abc123-2", 120, &["B"])];

    merger.merge("abc123", &batch).await.unwrap();
    let first = read_coverage(&store, "abc123").await.unwrap();

    let second = merger.merge("abc123", &batch).await.unwrap();
    assert_eq!(second, MergeOutcome::Unchanged);
    assert_eq!(store.puts_for("abc123"), 1);
    assert_eq!(read_coverage(&store, "abc123").await.unwrap(), first);
}

#[tokio::test]
async fn merge_migrates_legacy_history() {
    let store = TracingKvStore::new();
    seed_coverage(
        &store,
        "abc123",
        &json!([
            {"time": "50", "path": ["Old"]},
            {"time": 60, "path": []}
        ]),
        json!({"heard": 1, "lost": 1, "lastHeard": 50, "updated": "60", "hitRepeaters": ["old"]}),
    )
    .await;

    let merger = CoverageMerger::new(&store, 15);
    let outcome = merger
        .merge("abc123", &[sample("abc123-1", 70, &["New"])])
        .await
        .unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged(ref s) if s.migrated == 2));

    let (history, metadata) = read_coverage(&store, "abc123").await.unwrap();
    assert_eq!(
        history,
        json!([
            {"time": 50, "heard": 1, "lost": 0, "lastHeard": 50, "repeaters": ["Old"]},
            {"time": 60, "heard": 0, "lost": 1, "lastHeard": 0, "repeaters": []},
            {"time": 70, "heard": 1, "lost": 0, "lastHeard": 70, "repeaters": ["New"]}
        ])
    );
    for record in history.as_array().unwrap() {
        assert!(record.get("path").is_none());
        assert!(record["time"].is_i64());
    }
    assert_eq!(
        metadata,
        json!({
            "heard": 2,
            "lost": 1,
            "lastHeard": 70,
            "updated": 70,
            "hitRepeaters": ["new", "old"]
        })
    );
}

#[tokio::test]
async fn unrecognised_history_fails_without_write() {
    let store = TracingKvStore::new();
    seed_coverage(&store, "abc123", &json!([{"time": 5}]), json!({"updated": 5})).await;
    store.clear_operations();

    let merger = CoverageMerger::new(&store, 15);
    let err = merger
        .merge("abc123", &[sample("abc123-1", 10, &["A"])])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("index 0"));
    assert_eq!(store.puts_for("abc123"), 0);
}

#[tokio::test]
async fn read_failure_is_returned() {
    let store = TracingKvStore::new();
    store.inject_failure(OpKind::Get, "abc");

    let merger = CoverageMerger::new(&store, 15);
    assert!(
        merger
            .merge("abc123", &[sample("abc123-1", 10, &["A"])])
            .await
            .is_err()
    );
    assert!(store.get_with_metadata("abc123").await.is_err());
}

#[tokio::test]
async fn null_metadata_fields_read_as_absent() {
    let store = TracingKvStore::new();
    seed_coverage(
        &store,
        "abc123",
        &json!([history_record(40)]),
        json!({"heard": null, "lost": 0, "lastHeard": null, "updated": null, "hitRepeaters": null}),
    )
    .await;

    let merger = CoverageMerger::new(&store, 15);
    let outcome = merger
        .merge("abc123", &[sample("abc123-1", 50, &["A"])])
        .await
        .unwrap();
    assert!(matches!(outcome, MergeOutcome::Merged(_)));

    let (_, metadata) = read_coverage(&store, "abc123").await.unwrap();
    assert_eq!(metadata["updated"], json!(50));
    assert_eq!(metadata["heard"], json!(2));
    assert_eq!(metadata["hitRepeaters"], json!(["a", "r40"]));
}

#[tokio::test]
async fn record_with_mistyped_heard_fails_without_write() {
    let store = TracingKvStore::new();
    seed_coverage(
        &store,
        "abc123",
        &json!([{"time": 40, "heard": "2", "path": ["Old"]}]),
        json!({"updated": 40}),
    )
    .await;
    store.clear_operations();

    let merger = CoverageMerger::new(&store, 15);
    let err = merger
        .merge("abc123", &[sample("abc123-1", 50, &["A"])])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("index 0"));
    assert_eq!(store.puts_for("abc123"), 0);
}
