//! SHA-256 hashing of step inputs.
//!
//! A step key must not change between runs of the same instance, so the
//! hashed bytes come from bincode's fixed encoding of `(seq, step, input)`
//! rather than from a map-order-sensitive text form. The digest feeds
//! [`step_key`](super::step_key) as the UUID v5 name.

use bincode::config;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 digest of raw bytes.
///
/// # Examples
///
/// ```
/// use cgn_workflow::idempotent::hash_input;
///
/// let digest = hash_input(b"UpdateStatus");
/// assert_eq!(digest.len(), 32);
/// assert_eq!(digest, hash_input(b"UpdateStatus"));
/// assert_ne!(digest, hash_input(b"SendNotification"));
/// ```
#[inline]
pub fn hash_input(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 digest of a value's bincode encoding.
///
/// Two calls with equal values always agree, which is what makes a
/// re-delivered activity carry the same idempotency key.
///
/// # Errors
///
/// Returns the bincode error if the value cannot be encoded.
///
/// # Examples
///
/// ```
/// use cgn_workflow::idempotent::hash_serializable;
/// use serde_json::json;
///
/// let payload = json!({"holder_id": "RSSMRA85T10A562S", "status": "ACTIVATED"});
/// let first = hash_serializable(&(2_u64, "UpdateStatus", &payload)).expect("encodable");
/// let replayed = hash_serializable(&(2_u64, "UpdateStatus", &payload)).expect("encodable");
/// assert_eq!(first, replayed);
/// ```
pub fn hash_serializable<T: Serialize>(value: &T) -> Result<[u8; 32], bincode::error::EncodeError> {
    let bytes = bincode::serde::encode_to_vec(value, config::standard())?;
    Ok(hash_input(&bytes))
}
