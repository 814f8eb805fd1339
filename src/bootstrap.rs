//! # Engine Bootstrap
//!
//! Wires the store, registry, event publisher, dispatcher and lifecycle service into
//! one [`TaskEngine`], starts the dispatch loop and owns shutdown.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskforge::bootstrap::TaskEngine;
//! use taskforge::config::TaskforgeConfig;
//! # use taskforge::execution::batch::{AnswerEvaluator, AnswerRepository};
//!
//! # async fn example(
//! #     evaluator: Arc<dyn AnswerEvaluator>,
//! #     repository: Arc<dyn AnswerRepository>,
//! # ) -> taskforge::error::Result<()> {
//! let engine = TaskEngine::connect(TaskforgeConfig::default(), evaluator, repository).await?;
//! let stats = engine.lifecycle().get_task_statistics().await?;
//! println!("{} task(s) known", stats.total);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::TaskforgeConfig;
use crate::constants::{events, ORPHANED_TASK_MESSAGE};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::execution::batch::{AnswerEvaluator, AnswerRepository};
use crate::execution::{
    BatchEvaluationExecutor, BatchSettings, DispatchQueue, ExecutionDispatcher,
};
use crate::logging::log_task_operation;
use crate::models::{LogLevel, TaskKind};
use crate::registry::{CancelSignal, TaskRuntimeRegistry};
use crate::services::TaskLifecycleService;
use crate::state_machine::TaskStatus;
use crate::store::{InMemoryTaskStore, PgTaskStore, StatusUpdate, TaskStore};

/// A running engine
pub struct TaskEngine {
    config: TaskforgeConfig,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRuntimeRegistry>,
    events: EventPublisher,
    dispatcher: Arc<ExecutionDispatcher>,
    lifecycle: TaskLifecycleService,
    shutdown: CancelSignal,
    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("dispatcher", &self.dispatcher)
            .field("running", &self.registry.running_count())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskEngine {
    pub fn builder(
        evaluator: Arc<dyn AnswerEvaluator>,
        repository: Arc<dyn AnswerRepository>,
    ) -> TaskEngineBuilder {
        TaskEngineBuilder {
            evaluator,
            repository,
            config: TaskforgeConfig::default(),
            store: None,
            events: None,
            recover_orphans: true,
        }
    }

    /// Build an engine from configuration: Postgres when `database.url` is set,
    /// otherwise the in-memory store.
    pub async fn connect(
        config: TaskforgeConfig,
        evaluator: Arc<dyn AnswerEvaluator>,
        repository: Arc<dyn AnswerRepository>,
    ) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn TaskStore> = if config.database.url.is_some() {
            Arc::new(PgTaskStore::connect(&config.database).await?)
        } else {
            info!("No database configured, using in-memory task store");
            InMemoryTaskStore::arc()
        };

        Self::builder(evaluator, repository)
            .config(config)
            .store(store)
            .build()
            .await
    }

    pub fn lifecycle(&self) -> &TaskLifecycleService {
        &self.lifecycle
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TaskRuntimeRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn dispatcher(&self) -> &Arc<ExecutionDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &TaskforgeConfig {
        &self.config
    }

    /// Fail tasks left RUNNING by a previous process. Returns how many were failed.
    ///
    /// Only tasks without a live run in this process are touched.
    pub async fn recover_orphaned_tasks(&self) -> Result<usize> {
        let mut recovered = 0;
        for task_id in self
            .store
            .task_ids_with_status(&[TaskStatus::Running])
            .await?
        {
            if self.registry.is_running(&task_id) {
                continue;
            }

            let update = StatusUpdate::to(TaskStatus::Failed)
                .completed_now()
                .with_error(ORPHANED_TASK_MESSAGE);
            let Some(task) = self
                .store
                .transition_status(&task_id, &[TaskStatus::Running], update)
                .await?
            else {
                continue;
            };

            self.store
                .append_log(&task_id, LogLevel::Error, ORPHANED_TASK_MESSAGE)
                .await?;
            log_task_operation(
                events::TASK_RECOVERED,
                Some(&task_id),
                Some(&task.task_type),
                task.status.as_str(),
                Some(ORPHANED_TASK_MESSAGE),
            );
            self.events.publish_task(&task);
            recovered += 1;
        }

        if recovered > 0 {
            warn!(recovered, "Failed orphaned tasks from a previous run");
        }
        Ok(recovered)
    }

    /// Cancel every live run, stop the dispatch loop and wait for runs to drain.
    ///
    /// Returns whether every run finished within `engine.shutdown_timeout_ms`.
    pub async fn shutdown(&self) -> bool {
        let signalled = self.registry.cancel_all();
        self.shutdown.cancel();
        info!(signalled, "🛑 Shutting down task engine");

        let handle = self.dispatch_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Dispatch loop ended abnormally");
            }
        }

        let drained = self
            .registry
            .wait_until_empty(self.config.engine.shutdown_timeout())
            .await;
        if drained {
            info!("✅ Task engine stopped");
        } else {
            warn!(
                remaining = self.registry.running_count(),
                "Shutdown timed out with runs still draining"
            );
        }
        drained
    }
}

pub struct TaskEngineBuilder {
    evaluator: Arc<dyn AnswerEvaluator>,
    repository: Arc<dyn AnswerRepository>,
    config: TaskforgeConfig,
    store: Option<Arc<dyn TaskStore>>,
    events: Option<EventPublisher>,
    recover_orphans: bool,
}

impl TaskEngineBuilder {
    pub fn config(mut self, config: TaskforgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Whether `build` fails orphaned RUNNING tasks (default true)
    pub fn recover_orphans(mut self, recover: bool) -> Self {
        self.recover_orphans = recover;
        self
    }

    /// Wire the engine and start its dispatch loop. Must run inside a Tokio runtime.
    pub async fn build(self) -> Result<TaskEngine> {
        self.config.validate()?;

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => InMemoryTaskStore::arc(),
        };
        let events = self
            .events
            .unwrap_or_else(|| EventPublisher::new(self.config.events.channel_capacity));
        let registry = Arc::new(TaskRuntimeRegistry::new());

        let batch = Arc::new(BatchEvaluationExecutor::new(
            self.evaluator,
            self.repository,
            BatchSettings::from(&self.config.engine),
        ));
        let dispatcher = Arc::new(
            ExecutionDispatcher::builder(Arc::clone(&store), Arc::clone(&registry), events.clone())
                .executor_for(&TaskKind::ALL, batch)
                .build(),
        );

        let (queue, receiver) = DispatchQueue::channel(self.config.engine.dispatch_channel_capacity);
        let lifecycle = TaskLifecycleService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            events.clone(),
            queue,
        );

        let shutdown = CancelSignal::new();
        let dispatch_loop = tokio::spawn(Arc::clone(&dispatcher).run(receiver, shutdown.clone()));

        let engine = TaskEngine {
            config: self.config,
            store,
            registry,
            events,
            dispatcher,
            lifecycle,
            shutdown,
            dispatch_loop: Mutex::new(Some(dispatch_loop)),
        };

        if self.recover_orphans {
            engine.recover_orphaned_tasks().await?;
        }

        info!(
            max_concurrent_items = engine.config.engine.max_concurrent_items,
            max_attempts = engine.config.engine.max_attempts,
            "🚀 Task engine started"
        );
        Ok(engine)
    }
}
