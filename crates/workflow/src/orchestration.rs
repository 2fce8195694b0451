//! Orchestration programs and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::OrchestrationContext;
use crate::error::{Error, Result};

/// A deterministic program driven by the engine.
///
/// `run` must derive every decision from its input and from values the
/// context returns. It may be run many times for the same instance; all
/// side effects go through the context.
#[async_trait]
pub trait Orchestration: Send + Sync {
    /// Name instances are started under.
    fn name(&self) -> &str;

    /// Run the program from the top.
    async fn run(&self, ctx: &mut OrchestrationContext, input: Value) -> Result<Value>;
}

/// Decode an orchestration input, reporting schema errors at step `input`.
///
/// # Errors
///
/// Returns `Decode` when the payload does not match `T`.
pub fn decode_input<T: DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| Error::decode("input", e))
}

/// Registry of orchestrations by name.
#[derive(Default, Clone)]
pub struct OrchestrationRegistry {
    orchestrations: HashMap<String, Arc<dyn Orchestration>>,
}

impl OrchestrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, orchestration: Arc<dyn Orchestration>) {
        self.orchestrations
            .insert(orchestration.name().to_string(), orchestration);
    }

    #[must_use]
    pub fn with(mut self, orchestration: Arc<dyn Orchestration>) -> Self {
        self.register(orchestration);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Orchestration>> {
        self.orchestrations.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.orchestrations.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Input {
        #[allow(dead_code)]
        holder_id: String,
    }

    #[test]
    fn test_decode_input_error_names_input_step() {
        let result = decode_input::<Input>(json!({"holder": "E1"}));
        assert!(matches!(result, Err(Error::Decode { ref step, .. }) if step == "input"));
    }
}
