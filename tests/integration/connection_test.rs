//! Multi-participant tests over the in-memory transport

use std::time::Duration;

use pagecollab::backend::collab::SessionError;
use pagecollab::shared::message::{ErrorCode, MessageBody, SenderId};
use pretty_assertions::assert_eq;

use crate::common::{cursor_frame, edit_frame, quiet_config, seeded_store, spawn_session, TestClient};
use crate::{assert_contains, assert_err, assert_ok};

#[tokio::test]
async fn test_three_participants_converge() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await;
    let mut bob = TestClient::connect(&session, "bob");
    bob.recv().await;
    alice.recv().await; // bob joined
    let mut carol = TestClient::connect(&session, "carol");
    match carol.recv().await.body {
        MessageBody::FullSync(sync) => {
            assert_eq!(sync.version, 1);
            let mut peers: Vec<String> = sync.users.into_iter().map(|p| p.user_id).collect();
            peers.sort();
            assert_eq!(peers, vec!["alice".to_string(), "bob".to_string()]);
        }
        other => panic!("Expected FullSync, got {:?}", other),
    }
    alice.recv().await; // carol joined
    bob.recv().await; // carol joined

    alice.send(&edit_frame("one", 1)).await;
    assert!(matches!(alice.recv().await.body, MessageBody::Ack(ref ack) if ack.version == 2));
    for peer in [&mut bob, &mut carol] {
        let relayed = peer.recv().await;
        assert_eq!(relayed.sender, SenderId::User("alice".to_string()));
    }

    bob.send(&edit_frame("two", 2)).await;
    assert!(matches!(bob.recv().await.body, MessageBody::Ack(ref ack) if ack.version == 3));
    alice.recv().await;
    carol.recv().await;

    let (bytes, version) = session.snapshot();
    let document: serde_json::Value = assert_ok!(serde_json::from_slice(&bytes));
    assert_eq!(version, 3);
    assert_eq!(document["components"]["2"]["props"]["text"], "two");
}

#[tokio::test]
async fn test_stale_edit_gets_conflict_and_peers_see_nothing() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await;
    let mut bob = TestClient::connect(&session, "bob");
    bob.recv().await;
    alice.recv().await;

    alice.send(&edit_frame("first", 1)).await;
    alice.recv().await; // ack
    bob.recv().await; // relayed

    bob.send(&edit_frame("stale", 1)).await;
    match bob.recv().await.body {
        MessageBody::Error(error) => {
            assert_eq!(error.code, ErrorCode::VersionConflict);
            assert_eq!(error.current_version, Some(2));
        }
        other => panic!("Expected Error, got {:?}", other),
    }
    assert!(alice.try_recv(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_cursor_moves_reach_peers_only() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await;
    let mut bob = TestClient::connect(&session, "bob");
    bob.recv().await;
    alice.recv().await;

    alice.send(&cursor_frame(10, 20)).await;
    let moved = bob.recv().await;
    assert_eq!(moved.sender, SenderId::User("alice".to_string()));
    assert!(matches!(moved.body, MessageBody::CursorUpdate(_)));
    assert!(alice.try_recv(Duration::from_millis(50)).await.is_none());
    assert_eq!(session.version(), 1);
}

#[tokio::test]
async fn test_leaving_participant_is_announced() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;

    let mut alice = TestClient::connect(&session, "alice");
    alice.recv().await;
    let mut bob = TestClient::connect(&session, "bob");
    bob.recv().await;
    alice.recv().await;

    assert_ok!(bob.close().await);
    match alice.recv().await.body {
        MessageBody::ParticipantLeft(participant) => assert_eq!(participant.user_id, "bob"),
        other => panic!("Expected ParticipantLeft, got {:?}", other),
    }
    assert_eq!(session.connection_count(), 1);
}

#[tokio::test]
async fn test_join_after_stop_is_refused() {
    let store = seeded_store(&["doc"]).await;
    let session = spawn_session(store, "doc", quiet_config()).await;
    session.stop(None).await;

    let mut late = TestClient::connect(&session, "late");
    match late.recv().await.body {
        MessageBody::Error(error) => {
            assert_eq!(error.code, ErrorCode::SessionClosing);
            assert_contains!(error.message, "clos");
        }
        other => panic!("Expected Error, got {:?}", other),
    }
    late.expect_closed().await;
    assert_err!(late.join_result().await, SessionError::Closing);
}
