//! Instance identity: `"<entityId>-<OPERATION>-<STATUS>"`.
//!
//! One id per (entity, operation, target status). Re-using the id of a
//! live instance is what makes starts idempotent.

use std::fmt;

/// Parsed instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity {
    pub entity_id: String,
    pub operation: String,
    pub status: String,
}

impl InstanceIdentity {
    pub fn new(
        entity_id: impl Into<String>,
        operation: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            operation: operation.into(),
            status: status.into(),
        }
    }

    /// Split an id back into its parts.
    ///
    /// The entity id may itself contain `-`; operation and status may not.
    pub fn parse(id: &str) -> Option<Self> {
        let mut parts = id.rsplitn(3, '-');
        let status = parts.next().filter(|s| !s.is_empty())?;
        let operation = parts.next().filter(|s| !s.is_empty())?;
        let entity_id = parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(entity_id, operation, status))
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.entity_id, self.operation, self.status)
    }
}

/// Build the instance id for an entity transition.
pub fn make_instance_id(entity_id: &str, operation: &str, status: &str) -> String {
    InstanceIdentity::new(entity_id, operation, status).to_string()
}
