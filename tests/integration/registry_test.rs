//! Session registry lifecycle tests

use std::time::Duration;

use pagecollab::backend::collab::{CloseReason, RegistryError, SessionRegistry};
use pagecollab::backend::store::DocumentStore;
use pagecollab::shared::message::{ErrorCode, MessageBody};
use pretty_assertions::assert_eq;

use crate::common::{edit_frame, quiet_config, seeded_store, TestClient};
use crate::{assert_err, assert_ok};

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn test_unknown_document_is_not_registered() {
    let store = seeded_store(&[]).await;
    let registry = SessionRegistry::new(store, quiet_config());

    assert_err!(registry.get_or_create("ghost").await, RegistryError::DocumentNotFound(_));
    assert_eq!(registry.session_count().await, 0);
    assert!(registry.get("ghost").await.is_none());
}

#[tokio::test]
async fn test_last_leave_unregisters_and_flushes() {
    let store = seeded_store(&["doc"]).await;
    let registry = SessionRegistry::new(store.clone(), quiet_config());
    let session = assert_ok!(registry.get_or_create("doc").await);

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await; // sync
    alice.send(&edit_frame("from alice", 1)).await;
    assert!(matches!(alice.recv().await.body, MessageBody::Ack(_)));

    assert_ok!(alice.close().await);
    wait_until(|| session.is_stopped()).await;

    assert_eq!(assert_ok!(store.load_state("doc").await).version, 2);
    for _ in 0..100 {
        if registry.session_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.session_count().await, 0);
}

#[tokio::test]
async fn test_reopen_after_idle_resumes_from_store() {
    let store = seeded_store(&["doc"]).await;
    let registry = SessionRegistry::new(store.clone(), quiet_config());

    let first = assert_ok!(registry.get_or_create("doc").await);
    let mut alice = TestClient::connect(&first, "alice");
    alice.recv().await;
    alice.send(&edit_frame("v2", 1)).await;
    alice.recv().await; // ack
    assert_ok!(alice.close().await);
    wait_until(|| first.is_stopped()).await;

    let second = loop {
        match registry.get_or_create("doc").await {
            Ok(session) if !session.same_instance(&first) => break session,
            Ok(_) | Err(RegistryError::Closing(_)) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => panic!("unexpected error: {}", e),
        }
    };
    assert_eq!(second.version(), 2);
}

#[tokio::test]
async fn test_force_close_notifies_participants() {
    let store = seeded_store(&["doc"]).await;
    let registry = SessionRegistry::new(store, quiet_config());
    let session = assert_ok!(registry.get_or_create("doc").await);

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await;

    assert!(registry.force_close("doc", CloseReason::document_deleted()).await);
    match alice.recv().await.body {
        MessageBody::Error(error) => assert_eq!(error.code, ErrorCode::DocumentDeleted),
        other => panic!("Expected Error, got {:?}", other),
    }
    alice.expect_closed().await;
    assert!(registry.get("doc").await.is_none());
    assert!(!registry.force_close("doc", CloseReason::document_deleted()).await);
}

#[tokio::test]
async fn test_shutdown_flushes_every_session() {
    let store = seeded_store(&["a", "b"]).await;
    let registry = SessionRegistry::new(store.clone(), quiet_config());

    for id in ["a", "b"] {
        let session = assert_ok!(registry.get_or_create(id).await);
        assert_ok!(session.apply_patch(crate::common::set_text(id), 1).await);
    }
    assert_eq!(registry.document_ids().await, vec!["a".to_string(), "b".to_string()]);

    registry.shutdown().await;

    assert_eq!(registry.session_count().await, 0);
    assert_eq!(assert_ok!(store.load_state("a").await).version, 2);
    assert_eq!(assert_ok!(store.load_state("b").await).version, 2);
}
