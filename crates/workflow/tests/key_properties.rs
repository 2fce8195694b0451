//! Property-based tests for instance ids and step keys.
//!
//! Uses proptest to validate:
//! - Instance ids parse back into their parts
//! - Step keys are deterministic
//! - Step keys differ across instances and steps

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use cgn_workflow::idempotent::step_key;
use cgn_workflow::{make_instance_id, InstanceIdentity};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    /// Property: an id built from parts parses back to the same parts,
    /// even when the entity id contains dashes.
    #[test]
    fn prop_identity_roundtrip(
        entity in "[A-Z0-9][A-Z0-9-]{0,20}[A-Z0-9]",
        operation in "[A-Z]{3,8}",
        status in "[A-Z_]{3,12}",
    ) {
        let id = make_instance_id(&entity, &operation, &status);
        let parsed = InstanceIdentity::parse(&id);
        prop_assert_eq!(parsed, Some(InstanceIdentity::new(entity, operation, status)));
    }

    /// Property: same step always yields the same key.
    #[test]
    fn prop_step_key_determinism(
        instance in "[A-Z0-9]{4,16}-UPDCGN-ACTIVATED",
        seq in 0u64..64,
        holder in "[A-Z0-9]{16}",
    ) {
        let input = json!({"holder_id": holder});
        let first = step_key(&instance, seq, "UpdateStatus", &input);
        let second = step_key(&instance, seq, "UpdateStatus", &input);
        prop_assert!(first.is_ok());
        prop_assert_eq!(first.ok(), second.ok());
    }

    /// Property: keys are scoped by instance.
    #[test]
    fn prop_step_key_instance_scoped(
        a in "[A-Z0-9]{8}",
        b in "[A-Z0-9]{8}",
        seq in 0u64..64,
    ) {
        prop_assume!(a != b);
        let input = json!({"holder_id": "E1"});
        let key_a = step_key(&a, seq, "SendNotification", &input).ok();
        let key_b = step_key(&b, seq, "SendNotification", &input).ok();
        prop_assert_ne!(key_a, key_b);
    }

    /// Property: keys are scoped by step number.
    #[test]
    fn prop_step_key_seq_scoped(seq in 0u64..1000) {
        let input = json!({"holder_id": "E1"});
        let here = step_key("E1-UPDCGN-ACTIVATED", seq, "UpdateStatus", &input).ok();
        let next = step_key("E1-UPDCGN-ACTIVATED", seq + 1, "UpdateStatus", &input).ok();
        prop_assert_ne!(here, next);
    }
}
