//! Property-based tests for version accounting

use pagecollab::backend::collab::SessionError;
use proptest::prelude::*;

use crate::common::{quiet_config, seeded_store, set_text, spawn_session};

#[derive(Debug, Clone)]
enum Step {
    /// Well-formed edit at the current version
    Valid(String),
    /// Edit claiming a version that is `lag` behind
    Stale(u64),
    /// Operation list that fails to parse
    Malformed,
    /// Well-formed but unappliable (missing path)
    Unappliable,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(Step::Valid),
        (1u64..4).prop_map(Step::Stale),
        Just(Step::Malformed),
        Just(Step::Unappliable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Version grows by exactly one per accepted edit, and never otherwise
    #[test]
    fn test_version_counts_accepted_edits(steps in prop::collection::vec(step(), 1..24)) {
        tokio_test::block_on(async {
            let store = seeded_store(&["doc"]).await;
            let session = spawn_session(store, "doc", quiet_config()).await;
            let mut accepted = 0u64;

            for step in steps {
                let before = session.version();
                let result = match step {
                    Step::Valid(text) => session.apply_patch(set_text(&text), before).await,
                    Step::Stale(lag) => session.apply_patch(set_text("stale"), before.saturating_sub(lag)).await,
                    Step::Malformed => session.apply_patch(r#"{"op":"add"}"#, before).await,
                    Step::Unappliable => {
                        session
                            .apply_patch(r#"[{"op":"remove","path":"/missing/deep"}]"#, before)
                            .await
                    }
                };

                match result {
                    Ok(version) => {
                        accepted += 1;
                        assert_eq!(version, before + 1);
                    }
                    Err(SessionError::VersionConflict { current, .. }) => assert_eq!(current, before),
                    Err(SessionError::PatchInvalid(_)) | Err(SessionError::PatchFailed(_)) => {}
                    Err(other) => panic!("unexpected error: {}", other),
                }
                assert!(session.version() >= before);
            }

            assert_eq!(session.version(), 1 + accepted);
            session.stop(None).await;
        });
    }
}
