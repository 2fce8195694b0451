//! Orchestration execution engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityRegistry;
use crate::clock::{Clock, SystemClock};
use crate::context::OrchestrationContext;
use crate::error::{Error, Result};
use crate::invoker::ActivityInvoker;
use crate::orchestration::{Orchestration, OrchestrationRegistry};
use crate::retry::RetryPolicy;
use crate::storage::InstanceStore;
use crate::types::{InstanceOutcome, WorkflowInstance};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum instances executing at once.
    pub max_concurrent: usize,
    /// Default retry policy for activity calls.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            retry: RetryPolicy::default(),
        }
    }
}

/// Orchestration engine.
///
/// The engine is responsible for:
/// - Creating instances and scheduling them on the runtime
/// - Running programs through a replaying context
/// - Recording terminal outcomes
/// - Relaying termination requests to running programs
/// - Resuming live instances after a restart
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn InstanceStore>,
    invoker: ActivityInvoker,
    orchestrations: Arc<OrchestrationRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    /// Termination flags of instances executing in this process.
    live: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
}

impl WorkflowEngine {
    /// Create an engine on the system clock.
    pub fn new(
        store: Arc<dyn InstanceStore>,
        activities: ActivityRegistry,
        orchestrations: OrchestrationRegistry,
        config: EngineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            invoker: ActivityInvoker::new(activities),
            orchestrations: Arc::new(orchestrations),
            clock: Arc::new(SystemClock),
            config,
            permits,
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the clock used for timers and timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> Arc<dyn InstanceStore> {
        Arc::clone(&self.store)
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create an instance and schedule it.
    ///
    /// # Errors
    ///
    /// - `OrchestrationNotFound` if `name` is not registered
    /// - `InstanceAlreadyRunning` if a live instance holds `instance_id`
    /// - store errors
    pub async fn start(&self, name: &str, instance_id: &str, input: Value) -> Result<String> {
        if !self.orchestrations.has(name) {
            return Err(Error::orchestration_not_found(name));
        }

        self.store
            .create(WorkflowInstance::new(instance_id, name, input, self.clock.now()))
            .await?;

        info!(instance_id, orchestration = name, "Started instance");
        self.spawn(instance_id.to_string());
        Ok(instance_id.to_string())
    }

    /// Run an instance on a background task.
    pub fn spawn(&self, instance_id: String) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(&instance_id).await {
                error!(instance_id = %instance_id, error = %e, "Instance run aborted");
            }
        })
    }

    /// Run an instance in the current task until it finishes or aborts.
    ///
    /// Returns the stored instance afterwards. A terminal instance is
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// - `InstanceNotFound` if no instance holds `instance_id`
    /// - `InstanceAlreadyRunning` if this process is already running it
    /// - store errors, which leave the instance live for a later resume
    pub async fn run(&self, instance_id: &str) -> Result<WorkflowInstance> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::storage_failed("acquire_permit", e))?;

        let flag = self.register(instance_id).await?;
        let result = self.execute(instance_id, &flag).await;
        self.live.write().await.remove(instance_id);
        result
    }

    async fn register(&self, instance_id: &str) -> Result<Arc<AtomicBool>> {
        let mut live = self.live.write().await;
        if live.contains_key(instance_id) {
            return Err(Error::instance_already_running(instance_id));
        }
        let flag = Arc::new(AtomicBool::new(false));
        live.insert(instance_id.to_string(), Arc::clone(&flag));
        Ok(flag)
    }

    async fn execute(&self, instance_id: &str, flag: &Arc<AtomicBool>) -> Result<WorkflowInstance> {
        let instance = self
            .store
            .load(instance_id)
            .await?
            .ok_or_else(|| Error::instance_not_found(instance_id))?;
        if instance.is_terminal() {
            return Ok(instance);
        }
        if instance.terminate_requested {
            flag.store(true, Ordering::SeqCst);
        }

        let orchestration = self
            .orchestrations
            .get(&instance.name)
            .ok_or_else(|| Error::orchestration_not_found(&instance.name))?;

        if !instance.history.is_empty() {
            info!(
                instance_id,
                recorded_steps = instance.history.len(),
                "Replaying instance"
            );
        }
        self.store.mark_running(instance_id, self.clock.now()).await?;

        let start = Instant::now();
        let outcome = self.drive(orchestration.as_ref(), instance, flag).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match outcome {
            Ok(output) => {
                info!(instance_id, duration_ms, "Instance completed");
                InstanceOutcome::Completed(output)
            }
            Err(Error::Terminated { .. }) => {
                warn!(instance_id, duration_ms, "Instance terminated");
                InstanceOutcome::Terminated("termination requested".to_string())
            }
            Err(e) if e.is_storage() => {
                error!(instance_id, error = %e, "Instance store failed, leaving instance for resume");
                return Err(e);
            }
            Err(e) => {
                error!(instance_id, duration_ms, error = %e, "Instance failed");
                InstanceOutcome::Failed(e.to_string())
            }
        };

        self.store.finish(instance_id, outcome, self.clock.now()).await?;
        self.store
            .load(instance_id)
            .await?
            .ok_or_else(|| Error::instance_not_found(instance_id))
    }

    async fn drive(
        &self,
        orchestration: &dyn Orchestration,
        instance: WorkflowInstance,
        flag: &Arc<AtomicBool>,
    ) -> Result<Value> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::terminated(&instance.id));
        }
        let mut ctx = OrchestrationContext::new(
            instance.id,
            instance.history,
            instance.custom_status,
            self.invoker.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.retry.clone(),
            Arc::clone(flag),
        );
        orchestration.run(&mut ctx, instance.input).await
    }

    /// Request termination.
    ///
    /// A running program stops at its next step boundary and keeps its
    /// custom status. Returns false if the instance already finished.
    ///
    /// # Errors
    ///
    /// `InstanceNotFound` or store errors.
    pub async fn terminate(&self, instance_id: &str) -> Result<bool> {
        let applied = self
            .store
            .request_termination(instance_id, self.clock.now())
            .await?;
        if let Some(flag) = self.live.read().await.get(instance_id) {
            flag.store(true, Ordering::SeqCst);
        }
        if applied {
            info!(instance_id, "Termination requested");
        }
        Ok(applied)
    }

    /// Current stored state of an instance.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn status(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        self.store.load(instance_id).await
    }

    /// Schedule every live instance in the store. Returns how many.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn resume_pending(&self) -> Result<usize> {
        let live = self.store.list_live().await?;
        for instance in &live {
            debug!(instance_id = %instance.id, runtime_status = %instance.runtime_status, "Resuming instance");
            self.spawn(instance.id.clone());
        }
        if !live.is_empty() {
            info!(count = live.len(), "Resumed live instances");
        }
        Ok(live.len())
    }

    /// Delete terminal instances idle for longer than `retention`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn purge_expired(&self, retention: Duration) -> Result<usize> {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r))
            .unwrap_or(now);
        let purged = self.store.purge_terminal_before(cutoff).await?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "Purged finished instances");
        }
        Ok(purged)
    }

    /// Poll until `predicate` holds for the stored instance or `timeout`
    /// passes. Returns the last state seen.
    ///
    /// # Errors
    ///
    /// `InstanceNotFound` if the instance does not exist, or store errors.
    pub async fn wait_for<P>(&self, instance_id: &str, timeout: Duration, predicate: P) -> Result<WorkflowInstance>
    where
        P: Fn(&WorkflowInstance) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let instance = self
                .store
                .load(instance_id)
                .await?
                .ok_or_else(|| Error::instance_not_found(instance_id))?;
            if predicate(&instance) || Instant::now() >= deadline {
                return Ok(instance);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until the instance is terminal or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Same as [`wait_for`](Self::wait_for).
    pub async fn wait_for_completion(&self, instance_id: &str, timeout: Duration) -> Result<WorkflowInstance> {
        self.wait_for(instance_id, timeout, WorkflowInstance::is_terminal)
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::activity::{ActivityContext, FnActivity};
    use crate::orchestration::decode_input;
    use crate::storage::InMemoryInstanceStore;
    use crate::types::{CustomStatus, RuntimeStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    struct Greeter;

    #[async_trait]
    impl Orchestration for Greeter {
        fn name(&self) -> &str {
            "Greeter"
        }

        async fn run(&self, ctx: &mut OrchestrationContext, input: Value) -> Result<Value> {
            let name: String = decode_input(input)?;
            let greeting: String = ctx.call_activity("Greet", &name).await?;
            ctx.set_custom_status(CustomStatus::Updated).await?;
            Ok(json!(greeting))
        }
    }

    fn engine() -> WorkflowEngine {
        let activities = ActivityRegistry::new().with(Arc::new(FnActivity::new(
            "Greet",
            |_ctx: ActivityContext, input: Value| async move {
                Ok(json!(format!("hello {}", input.as_str().unwrap_or_default())))
            },
        )));
        WorkflowEngine::new(
            Arc::new(InMemoryInstanceStore::new()),
            activities,
            OrchestrationRegistry::new().with(Arc::new(Greeter)),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let engine = engine();
        engine.store().create(WorkflowInstance::new("g1", "Greeter", json!("cgn"), Utc::now())).await.unwrap();

        let instance = engine.run("g1").await.unwrap();

        assert_eq!(instance.runtime_status, RuntimeStatus::Completed);
        assert_eq!(instance.custom_status, CustomStatus::Updated);
        assert_eq!(instance.output, Some(json!("hello cgn")));
    }

    #[tokio::test]
    async fn test_bad_input_fails_instance() {
        let engine = engine();
        engine.store().create(WorkflowInstance::new("g2", "Greeter", json!(42), Utc::now())).await.unwrap();

        let instance = engine.run("g2").await.unwrap();

        assert_eq!(instance.runtime_status, RuntimeStatus::Failed);
        assert_eq!(instance.custom_status, CustomStatus::Error);
    }

    #[tokio::test]
    async fn test_start_unknown_orchestration() {
        let engine = engine();
        let result = engine.start("Nope", "x", json!(null)).await;
        assert!(matches!(result, Err(Error::OrchestrationNotFound { .. })));
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let engine = engine();
        engine.start("Greeter", "g3", json!("world")).await.unwrap();

        let instance = engine
            .wait_for_completion("g3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(instance.output, Some(json!("hello world")));
    }

    #[tokio::test]
    async fn test_terminate_before_run() {
        let engine = engine();
        engine.store().create(WorkflowInstance::new("g4", "Greeter", json!("x"), Utc::now())).await.unwrap();

        assert!(engine.terminate("g4").await.unwrap());
        let instance = engine.run("g4").await.unwrap();

        assert_eq!(instance.runtime_status, RuntimeStatus::Terminated);
        assert_eq!(instance.custom_status, CustomStatus::Running);
        assert!(!engine.terminate("g4").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let engine = engine();
        engine.store().create(WorkflowInstance::new("g5", "Greeter", json!("x"), Utc::now())).await.unwrap();
        engine.run("g5").await.unwrap();

        assert_eq!(engine.purge_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(engine.purge_expired(Duration::ZERO).await.unwrap(), 1);
    }
}
