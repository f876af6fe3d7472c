//! Session concurrency and persistence tests

use std::collections::HashSet;

use futures_util::future::join_all;
use pagecollab::backend::collab::{FlushOutcome, FlushReason, SessionError};
use pagecollab::backend::store::DocumentStore;
use pretty_assertions::assert_eq;

use crate::common::{quiet_config, seeded_store, set_text, spawn_session};
use crate::{assert_err, assert_ok};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_edits_on_one_version_have_one_winner() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let attempts = (0..32).map(|i| {
        let session = session.clone();
        async move { session.apply_patch(set_text(&format!("writer {}", i)), 1).await }
    });
    let results = join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.into_iter().filter(|r| r.is_err()) {
        assert_err!(result, SessionError::VersionConflict { current: 2, expected: 1 });
    }
    assert_eq!(session.version(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_writers_get_distinct_versions() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    // Each writer retries on conflict until it lands
    let writers = (0..8).map(|i| {
        let session = session.clone();
        async move {
            loop {
                let expected = session.version();
                match session.apply_patch(set_text(&format!("w{}", i)), expected).await {
                    Ok(version) => return version,
                    Err(SessionError::VersionConflict { .. }) => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }
    });
    let versions: HashSet<u64> = join_all(writers).await.into_iter().collect();

    assert_eq!(versions, (2..=9).collect::<HashSet<u64>>());
    assert_eq!(session.version(), 9);
}

#[tokio::test]
async fn test_snapshot_matches_its_version() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    assert_ok!(session.apply_patch(set_text("one"), 1).await);
    assert_ok!(session.apply_patch(set_text("two"), 2).await);

    let (bytes, version) = session.snapshot();
    let document: serde_json::Value = assert_ok!(serde_json::from_slice(&bytes));
    assert_eq!(version, 3);
    assert_eq!(document["components"]["2"]["props"]["text"], "two");
}

/// Text written by the edit that produced `version`
fn text_at(version: u64) -> String {
    if version == 1 {
        "hello".to_string()
    } else {
        format!("v{}", version)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_stay_consistent_under_concurrent_edits() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    loop {
                        let expected = session.version();
                        match session.apply_patch(set_text(&text_at(expected + 1)), expected).await {
                            Ok(_) => break,
                            Err(SessionError::VersionConflict { .. }) => tokio::task::yield_now().await,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            })
        })
        .collect();

    let reader = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.last().copied().unwrap_or(0) < 101 {
                let (bytes, version) = session.snapshot();
                let document: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(document["components"]["2"]["props"]["text"], text_at(version));
                seen.push(version);
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    for writer in join_all(writers).await {
        assert_ok!(writer);
    }
    let seen = assert_ok!(reader.await);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(session.version(), 101);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flushes_persist_each_span_once() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store.clone(), "doc", quiet_config()).await;

    let mut spans = Vec::new();
    let mut last_seen = session.last_persisted_version();
    for round in 0..5u64 {
        for _ in 0..3 {
            let expected = session.version();
            assert_ok!(session.apply_patch(set_text(&text_at(expected + 1)), expected).await);
        }

        let flushes: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.flush(FlushReason::Manual).await })
            })
            .collect();
        let outcomes: Vec<FlushOutcome> = join_all(flushes)
            .await
            .into_iter()
            .map(|joined| assert_ok!(assert_ok!(joined)))
            .collect();

        let persisted: Vec<_> = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, FlushOutcome::Persisted { .. }))
            .copied()
            .collect();
        let target = 1 + 3 * (round + 1);
        assert_eq!(persisted, vec![FlushOutcome::Persisted { from: target - 3, to: target }]);
        spans.extend(persisted);

        let now = session.last_persisted_version();
        assert!(now >= last_seen);
        assert_eq!(now, target);
        last_seen = now;
    }

    assert_eq!(store.save_calls(), spans.len());
    assert_eq!(assert_ok!(store.load_state("doc").await).version, 16);
}

#[tokio::test]
async fn test_stop_persists_latest_state() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store.clone(), "doc", quiet_config()).await;

    assert_ok!(session.apply_patch(set_text("kept"), 1).await);
    assert_ok!(session.apply_patch(set_text("kept again"), 2).await);
    session.stop(None).await;

    let stored = assert_ok!(store.load_state("doc").await);
    assert_eq!(stored.version, 3);
    let document: serde_json::Value = assert_ok!(serde_json::from_slice(&stored.snapshot));
    assert_eq!(document["components"]["2"]["props"]["text"], "kept again");
    assert_eq!(store.save_calls(), 1);
}

#[tokio::test]
async fn test_manual_flush_then_nothing_to_do() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store.clone(), "doc", quiet_config()).await;

    assert_ok!(session.apply_patch(set_text("x"), 1).await);
    let first = assert_ok!(session.flush(FlushReason::Manual).await);
    assert_eq!(first, FlushOutcome::Persisted { from: 1, to: 2 });

    let second = assert_ok!(session.flush(FlushReason::Manual).await);
    assert_eq!(second, FlushOutcome::UpToDate);
    assert_eq!(session.last_persisted_version(), 2);
    assert_eq!(store.save_calls(), 1);
}

#[tokio::test]
async fn test_failed_flush_is_retried_on_stop() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store.clone(), "doc", quiet_config()).await;

    assert_ok!(session.apply_patch(set_text("x"), 1).await);
    store.set_fail_saves(true);
    assert_err!(session.flush(FlushReason::Manual).await);
    assert_eq!(session.last_persisted_version(), 1);

    store.set_fail_saves(false);
    session.stop(None).await;
    assert_eq!(assert_ok!(store.load_state("doc").await).version, 2);
}

#[tokio::test]
async fn test_edits_after_stop_are_refused() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    session.stop(None).await;
    assert!(session.is_stopped());
    assert_err!(session.apply_patch(set_text("late"), 1).await, SessionError::Closing);
}
