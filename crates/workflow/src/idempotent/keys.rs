//! UUID v5 step keys.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::idempotent::hash::hash_serializable;

/// Namespace UUID for all keys of one instance.
#[must_use]
pub fn namespace_for_instance(instance_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, instance_id.as_bytes())
}

/// Key for one activity step.
///
/// # Errors
///
/// Returns `Error::Serialization` if the input cannot be encoded.
pub fn step_key(instance_id: &str, seq: u64, step: &str, input: &Value) -> Result<Uuid> {
    let namespace = namespace_for_instance(instance_id);
    let step_hash = hash_serializable(&(seq, step, input)).map_err(Error::serialization)?;
    Ok(Uuid::new_v5(&namespace, &step_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_key_is_stable() -> Result<()> {
        let input = json!({"holder_id": "E1"});
        let first = step_key("E1-UPDCGN-ACTIVATED", 2, "UpdateStatus", &input)?;
        let second = step_key("E1-UPDCGN-ACTIVATED", 2, "UpdateStatus", &input)?;
        assert_eq!(first, second);
        assert_eq!(first.get_version_num(), 5);
        Ok(())
    }

    #[test]
    fn test_step_key_scoped_by_instance_and_seq() -> Result<()> {
        let input = json!({"holder_id": "E1"});
        let base = step_key("E1-UPDCGN-ACTIVATED", 2, "UpdateStatus", &input)?;
        assert_ne!(base, step_key("E1-UPDCGN-REVOKED", 2, "UpdateStatus", &input)?);
        assert_ne!(base, step_key("E1-UPDCGN-ACTIVATED", 3, "UpdateStatus", &input)?);
        Ok(())
    }
}
