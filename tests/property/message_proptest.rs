//! Property-based tests for the wire protocol

use pagecollab::shared::message::{color_for_user, Envelope, Participant};
use proptest::prelude::*;

proptest! {
    /// Arbitrary input never panics the decoder
    #[test]
    fn test_decode_total(text in ".{0,256}") {
        let _ = Envelope::decode(&text);
    }

    /// Cursor colour depends only on the user id
    #[test]
    fn test_color_is_stable(user_id in "[a-zA-Z0-9_-]{1,32}", name_a in "[a-z]{1,8}", name_b in "[a-z]{1,8}") {
        let a = Participant::new(user_id.clone(), name_a);
        let b = Participant::new(user_id.clone(), name_b);
        prop_assert_eq!(a.color.as_deref(), Some(color_for_user(&user_id)));
        prop_assert_eq!(a.color, b.color);
    }
}
