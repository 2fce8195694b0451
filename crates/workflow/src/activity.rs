//! Activity trait, context, and registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

/// Error returned by one activity attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// Infrastructure hiccup. Retried per policy.
    Transient(String),
    /// The operation refused. Never retried.
    Permanent(String),
    /// The input did not match the activity's schema. Aborts the instance.
    InvalidInput(String),
}

impl ActivityError {
    pub fn transient(reason: impl fmt::Display) -> Self {
        Self::Transient(reason.to_string())
    }

    pub fn permanent(reason: impl fmt::Display) -> Self {
        Self::Permanent(reason.to_string())
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Permanent(r) | Self::InvalidInput(r) => r,
        }
    }
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(reason) => write!(f, "transient: {reason}"),
            Self::Permanent(reason) => write!(f, "permanent: {reason}"),
            Self::InvalidInput(reason) => write!(f, "invalid input: {reason}"),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Per-attempt context handed to an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    /// Owning instance.
    pub instance_id: String,
    /// Step name the activity is registered under.
    pub step: String,
    /// Step number within the instance.
    pub seq: u64,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Stable across attempts and replays of the same step.
    pub idempotency_key: Uuid,
}

/// Decode an activity input, mapping schema errors to `InvalidInput`.
///
/// # Errors
///
/// Returns `ActivityError::InvalidInput` when the payload does not match `T`.
pub fn decode_input<T: DeserializeOwned>(input: Value) -> Result<T, ActivityError> {
    serde_json::from_value(input).map_err(|e| ActivityError::InvalidInput(e.to_string()))
}

/// Encode an activity output.
///
/// # Errors
///
/// Returns `ActivityError::Permanent` if the value cannot be represented as JSON.
pub fn encode_output<T: serde::Serialize>(output: &T) -> Result<Value, ActivityError> {
    serde_json::to_value(output).map_err(ActivityError::permanent)
}

/// A named side-effecting step.
///
/// Activities run under at-least-once semantics: a crash between success
/// and the history write re-invokes them on resume. Implementations must be
/// idempotent, and can use `ActivityContext::idempotency_key` to dedupe.
#[async_trait]
pub trait Activity: Send + Sync {
    /// Name used in history and for lookup.
    fn name(&self) -> &str;

    /// Run one attempt.
    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

/// Registry of activities by name.
#[derive(Default, Clone)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity under its own name.
    pub fn register(&mut self, activity: Arc<dyn Activity>) {
        self.activities
            .insert(activity.name().to_string(), activity);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, activity: Arc<dyn Activity>) -> Self {
        self.register(activity);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

/// An activity that delegates to an async closure.
pub struct FnActivity<F, Fut>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send,
{
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnActivity<F, Fut>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Activity for FnActivity<F, Fut>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        (self.func)(ctx.clone(), input).await
    }
}
