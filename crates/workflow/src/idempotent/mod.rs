//! Deterministic idempotency keys for activity steps.
//!
//! A step key is a UUID v5 scoped to the owning instance:
//!
//! ```text
//! namespace = UUID v5(NAMESPACE_OID, instance_id)
//! step_hash = SHA-256(bincode((seq, step, input)))
//! key       = UUID v5(namespace, step_hash)
//! ```
//!
//! The same step of the same instance always yields the same key, across
//! retries, replays, and process restarts. Collaborators use it to drop
//! duplicate deliveries.

pub mod hash;
pub mod keys;

pub use hash::{hash_input, hash_serializable};
pub use keys::{namespace_for_instance, step_key};
