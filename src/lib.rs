#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskforge Core
//!
//! Asynchronous task orchestration with a bounded-concurrency batch evaluation engine.
//!
//! ## Overview
//!
//! Clients submit long-running background tasks. Each task has a persisted lifecycle
//! status, progress counters, a human-readable log stream and a structured result.
//! The headline task kind evaluates a batch of answers against a rate-limited
//! evaluation service: the batch is resolved once, fanned out under a fixed
//! concurrency cap, each answer is retried with linear backoff, and the outcome is
//! aggregated into COMPLETED, COMPLETED_WITH_ERRORS or FAILED.
//!
//! ## Architecture
//!
//! ```text
//! TaskLifecycleService ──► TaskStore ◄── StoreReporter ◄── BatchEvaluationExecutor
//!          │                                   ▲                     │
//!          └─► DispatchQueue ──► ExecutionDispatcher ──────────────────┘
//!                                       │
//!                                       └─► TaskRuntimeRegistry (cancel handles)
//! ```
//!
//! ## Module Organization
//!
//! - [`services`] - the lifecycle service: create, pause, resume, cancel, retry, delete, queries
//! - [`execution`] - dispatcher, executor strategy trait and the batch evaluation executor
//! - [`registry`] - live run handles and cooperative cancellation
//! - [`reporter`] - the narrow progress/log/result surface executors write through
//! - [`store`] - the task store trait with in-memory and PostgreSQL implementations
//! - [`models`] - tasks, logs, typed configuration, results and query projections
//! - [`state_machine`] - task statuses, events and the transition table
//! - [`events`] - status broadcast to subscribers
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup and helpers
//! - [`error`] - structured error handling
//! - [`bootstrap`] - engine wiring, orphan recovery and shutdown
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (PostgreSQL tests are ignored)
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod registry;
pub mod reporter;
pub mod services;
pub mod state_machine;
pub mod store;
pub mod validation;

pub use bootstrap::{TaskEngine, TaskEngineBuilder};
pub use config::{
    ConfigManager, DatabaseConfig, EngineConfig, EventsConfig, TaskforgeConfig, TelemetryConfig,
};
pub use constants::{status_groups, TaskStatus};
// Re-export constants events with different name to avoid conflict
pub use constants::events as system_events;
pub use error::{Result, TaskforgeError};
pub use events::{EventPublisher, TaskStatusMessage};
pub use execution::batch::{
    AnswerEvaluator, AnswerItem, AnswerRepository, EvaluationVerdict, QuestionContext,
};
pub use execution::{
    BatchEvaluationExecutor, BatchSettings, DispatchOutcome, DispatchQueue, DispatchRequest,
    ExecutionContext, ExecutionDispatcher, RetryPolicy, TaskExecutor,
};
pub use models::{
    CallerIdentity, CreateTaskRequest, EvaluationScope, ItemRecord, LogLevel, Page, Task,
    TaskConfig, TaskId, TaskKind, TaskLogEntry, TaskPriority, TaskQuery, TaskStatistics, TaskView,
};
pub use registry::{CancelSignal, TaskRuntimeRegistry};
pub use reporter::{ProgressReporter, StoreReporter};
pub use services::{ExportFormat, TaskLifecycleService};
pub use store::{InMemoryTaskStore, PgTaskStore, TaskStore};
