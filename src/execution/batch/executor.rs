//! # Batch Evaluation Executor
//!
//! Resolves the answer set once, then fans out one worker per answer behind a
//! counting admission gate. Each worker retries its answer with linear backoff and
//! gives its permit back while it sleeps between attempts. A failing answer never
//! aborts its siblings; it is folded into the result as a failed record.
//!
//! Cancellation stops admission. Answers already admitted run to completion and are
//! included in the saved result; the final status is left to whoever cancelled.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::collaborators::{AnswerEvaluator, AnswerItem, AnswerRepository, EvaluationVerdict};
use super::resolver::resolve_items;
use super::retry::RetryPolicy;
use crate::config::EngineConfig;
use crate::constants::defaults;
use crate::error::{Result, TaskforgeError};
use crate::execution::executor::{ExecutionContext, TaskExecutor};
use crate::execution::panic_message;
use crate::logging::log_item_operation;
use crate::models::{
    BatchSummary, CallerIdentity, ItemOutcomeStatus, ItemRecord, LogLevel, TaskId, TaskResultData,
};
use crate::reporter::ProgressReporter;
use crate::state_machine::TaskStatus;

/// Tunables for one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Permits on the admission gate
    pub max_concurrent_items: usize,
    pub retry: RetryPolicy,
    /// Persist progress every N completions (and always on the last one)
    pub progress_interval: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_items: defaults::MAX_CONCURRENT_ITEMS,
            retry: RetryPolicy::default(),
            progress_interval: defaults::PROGRESS_REPORT_INTERVAL,
        }
    }
}

impl From<&EngineConfig> for BatchSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrent_items: config.max_concurrent_items.max(1),
            retry: RetryPolicy::from(config),
            progress_interval: config.progress_report_interval.max(1),
        }
    }
}

pub struct BatchEvaluationExecutor {
    evaluator: Arc<dyn AnswerEvaluator>,
    repository: Arc<dyn AnswerRepository>,
    settings: BatchSettings,
}

impl std::fmt::Debug for BatchEvaluationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvaluationExecutor")
            .field("settings", &self.settings)
            .finish()
    }
}

impl BatchEvaluationExecutor {
    pub fn new(
        evaluator: Arc<dyn AnswerEvaluator>,
        repository: Arc<dyn AnswerRepository>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            evaluator,
            repository,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }
}

#[async_trait]
impl TaskExecutor for BatchEvaluationExecutor {
    fn name(&self) -> &'static str {
        "batch_evaluation"
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<()> {
        let task_id = ctx.task.task_id;
        let config = ctx.task.config.as_batch_evaluation().ok_or_else(|| {
            TaskforgeError::Resolution("task has no batch evaluation config".to_string())
        })?;

        let items = resolve_items(self.repository.as_ref(), &config.scope).await?;
        let total = items.len();

        ctx.reporter.report_progress(0, total).await?;
        ctx.reporter
            .append_log(
                LogLevel::Info,
                &format!(
                    "Resolved {total} answer(s) for {}; evaluating up to {} at a time",
                    config.scope.describe(),
                    self.settings.max_concurrent_items
                ),
            )
            .await?;

        let gate = Arc::new(Semaphore::new(self.settings.max_concurrent_items.max(1)));
        let worker = Arc::new(ItemWorker {
            task_id,
            evaluator: Arc::clone(&self.evaluator),
            repository: Arc::clone(&self.repository),
            caller: Arc::clone(&ctx.caller),
            reporter: Arc::clone(&ctx.reporter),
            gate: Arc::clone(&gate),
            retry: self.settings.retry,
            completed: AtomicUsize::new(0),
            total,
            progress_interval: self.settings.progress_interval.max(1),
        });

        let mut workers = JoinSet::new();
        let mut admitted: Vec<(i64, Option<i64>, Option<i64>)> = Vec::with_capacity(total);

        for item in items {
            if ctx.cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Cancelled while waiting for the permit
            if ctx.cancel.is_cancelled() {
                drop(permit);
                break;
            }

            admitted.push((item.answer_id, item.student_id, item.question_id));
            let worker = Arc::clone(&worker);
            workers.spawn(async move { worker.process(item, permit).await });
        }

        if ctx.cancel.is_cancelled() {
            info!(
                task_id = %task_id,
                admitted = admitted.len(),
                total,
                "Cancellation observed, admission stopped"
            );
        }

        let mut records = Vec::with_capacity(admitted.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(record) => records.push(record),
                Err(err) => warn!(task_id = %task_id, error = %err, "Item worker did not finish"),
            }
        }

        // Admitted answers whose worker vanished still count as processed failures
        let recorded: HashSet<i64> = records.iter().map(|record| record.item_id).collect();
        for (item_id, subject_id, target_id) in admitted {
            if !recorded.contains(&item_id) {
                records.push(ItemRecord {
                    item_id,
                    subject_id,
                    target_id,
                    outcome_status: ItemOutcomeStatus::Failed,
                    score: None,
                    feedback: None,
                    error: Some("item worker terminated unexpectedly".to_string()),
                    retry_count: 0,
                    timestamp: Utc::now(),
                });
            }
        }
        records.sort_by_key(|record| record.item_id);

        let cancelled = ctx.cancel.is_cancelled();
        let mut summary = BatchSummary::from_items(total, &records, Utc::now());
        summary.cancelled = cancelled;

        let processed = records.len();
        let result = TaskResultData {
            summary: summary.clone(),
            items: records,
        };
        ctx.reporter.save_result(&result).await?;
        ctx.reporter.report_progress(processed, total).await?;
        ctx.reporter
            .append_log(
                LogLevel::Result,
                &format!(
                    "{} of {total} answer(s) evaluated: {} succeeded, {} failed, {} skipped",
                    summary.processed_count,
                    summary.success_count,
                    summary.failure_count,
                    summary.skipped_count
                ),
            )
            .await?;

        if cancelled {
            ctx.reporter
                .append_log(
                    LogLevel::Info,
                    &format!("Run cancelled after {processed} of {total} answer(s)"),
                )
                .await?;
            return Ok(());
        }

        let status = summary.outcome.to_status();
        let error = (status == TaskStatus::Failed)
            .then(|| format!("all {} answer(s) failed evaluation", summary.failure_count));
        ctx.reporter.finish(status, error).await?;
        Ok(())
    }
}

/// State shared by the workers of one run
struct ItemWorker {
    task_id: TaskId,
    evaluator: Arc<dyn AnswerEvaluator>,
    repository: Arc<dyn AnswerRepository>,
    caller: Arc<CallerIdentity>,
    reporter: Arc<dyn ProgressReporter>,
    gate: Arc<Semaphore>,
    retry: RetryPolicy,
    completed: AtomicUsize,
    total: usize,
    progress_interval: usize,
}

impl ItemWorker {
    /// Run every attempt for one answer. `first_permit` was taken at admission; retries
    /// wait for a fresh permit after their backoff.
    async fn process(&self, item: AnswerItem, first_permit: OwnedSemaphorePermit) -> ItemRecord {
        let mut permit = Some(first_permit);
        let mut attempt: u32 = 1;

        let record = loop {
            let held = match permit.take() {
                Some(permit) => permit,
                None => match Arc::clone(&self.gate).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        break self
                            .failed(&item, attempt, "admission gate closed".to_string())
                            .await;
                    }
                },
            };

            let outcome = self.attempt(&item).await;
            drop(held);

            match outcome {
                Ok(verdict) => {
                    log_item_operation(
                        "evaluate",
                        &self.task_id,
                        item.answer_id,
                        attempt,
                        "success",
                        None,
                    );
                    break ItemRecord {
                        item_id: item.answer_id,
                        subject_id: item.student_id,
                        target_id: item.question_id,
                        outcome_status: ItemOutcomeStatus::Success,
                        score: verdict.score,
                        feedback: verdict.feedback,
                        error: None,
                        retry_count: attempt - 1,
                        timestamp: Utc::now(),
                    };
                }
                Err(message) => {
                    log_item_operation(
                        "evaluate",
                        &self.task_id,
                        item.answer_id,
                        attempt,
                        "failed",
                        Some(&message),
                    );
                    match self.retry.delay_after(attempt) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => break self.failed(&item, attempt, message).await,
                    }
                }
            }
        };

        self.record_completion().await;
        record
    }

    async fn attempt(&self, item: &AnswerItem) -> std::result::Result<EvaluationVerdict, String> {
        let verdict = match AssertUnwindSafe(self.evaluator.evaluate(item, &self.caller))
            .catch_unwind()
            .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => return Err(format!("{err:#}")),
            Err(panic) => return Err(format!("evaluator panicked: {}", panic_message(&*panic))),
        };

        if !verdict.success {
            return Err(verdict
                .error
                .clone()
                .unwrap_or_else(|| "evaluation reported failure".to_string()));
        }

        let evaluated = item.with_verdict(&verdict, Utc::now());
        self.repository
            .update_item(item.answer_id, &evaluated)
            .await
            .map_err(|err| format!("failed to persist evaluation: {err:#}"))?;

        Ok(verdict)
    }

    async fn failed(&self, item: &AnswerItem, attempts: u32, message: String) -> ItemRecord {
        let err = TaskforgeError::ItemExecution {
            item_id: item.answer_id,
            attempts,
            message: message.clone(),
        };
        warn!(task_id = %self.task_id, item_id = item.answer_id, attempts, "{err}");
        if let Err(log_err) = self.reporter.append_log(LogLevel::Warn, &err.to_string()).await {
            debug!(task_id = %self.task_id, error = %log_err, "Failed to persist item failure log");
        }

        ItemRecord {
            item_id: item.answer_id,
            subject_id: item.student_id,
            target_id: item.question_id,
            outcome_status: ItemOutcomeStatus::Failed,
            score: None,
            feedback: None,
            error: Some(message),
            retry_count: attempts.saturating_sub(1),
            timestamp: Utc::now(),
        }
    }

    async fn record_completion(&self) {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if done % self.progress_interval != 0 && done != self.total {
            return;
        }
        if let Err(err) = self.reporter.report_progress(done, self.total).await {
            warn!(task_id = %self.task_id, error = %err, done, "Failed to persist progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Task, TaskConfig, TaskKind, TaskPriority};
    use crate::registry::CancelSignal;
    use crate::store::{InMemoryTaskStore, TaskStore};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    struct AcceptAll;

    #[async_trait]
    impl AnswerEvaluator for AcceptAll {
        async fn evaluate(
            &self,
            _item: &AnswerItem,
            _caller: &CallerIdentity,
        ) -> anyhow::Result<EvaluationVerdict> {
            tokio::task::yield_now().await;
            Ok(EvaluationVerdict::success(1.0, "ok"))
        }
    }

    struct FixedAnswers;

    #[async_trait]
    impl AnswerRepository for FixedAnswers {
        async fn answer_ids_for_question(&self, _: i64, _: bool) -> anyhow::Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn answer_ids_for_exams(&self, _: &[i64], _: bool) -> anyhow::Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn fetch_with_dependencies(&self, ids: &[i64]) -> anyhow::Result<Vec<AnswerItem>> {
            Ok(ids
                .iter()
                .map(|id| AnswerItem::new(*id, format!("answer {id}")))
                .collect())
        }

        async fn update_item(&self, _: i64, _: &AnswerItem) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Records every call instead of persisting it
    #[derive(Default)]
    struct RecordingReporter {
        progress: Mutex<Vec<(usize, usize)>>,
        finished: Mutex<Option<TaskStatus>>,
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report_progress(&self, processed: usize, total: usize) -> Result<bool> {
            self.progress.lock().push((processed, total));
            Ok(true)
        }

        async fn append_log(&self, _level: LogLevel, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn save_result(&self, _result: &TaskResultData) -> Result<bool> {
            Ok(true)
        }

        async fn finish(&self, status: TaskStatus, _error: Option<String>) -> Result<bool> {
            *self.finished.lock() = Some(status);
            Ok(true)
        }
    }

    async fn batch_task(answer_ids: &[i64]) -> Task {
        let store = InMemoryTaskStore::arc();
        let config = TaskConfig::parse(
            Some(TaskKind::BatchEvaluation),
            &json!({ "answerIds": answer_ids }),
        )
        .unwrap();
        store
            .insert_task(NewTask {
                task_id: TaskId::new(),
                task_type: "BATCH_EVALUATION".to_string(),
                name: "batch".to_string(),
                description: None,
                config,
                priority: TaskPriority::Normal,
                created_by: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_progress_written_every_nth_completion_and_on_last() {
        let executor = BatchEvaluationExecutor::new(
            Arc::new(AcceptAll),
            Arc::new(FixedAnswers),
            BatchSettings {
                max_concurrent_items: 2,
                retry: RetryPolicy::linear(1, Duration::from_millis(1)),
                progress_interval: 3,
            },
        );
        let reporter = Arc::new(RecordingReporter::default());
        let ctx = ExecutionContext {
            task: batch_task(&[1, 2, 3, 4, 5, 6, 7]).await,
            run_id: Uuid::new_v4(),
            caller: Arc::new(CallerIdentity::new("grader")),
            reporter: reporter.clone(),
            cancel: CancelSignal::new(),
        };

        executor.execute(ctx).await.unwrap();

        let progress = reporter.progress.lock().clone();
        // Resolution, then completions 3, 6 and 7, then the final write
        assert_eq!(progress.first(), Some(&(0, 7)));
        assert_eq!(progress.last(), Some(&(7, 7)));
        let mut throttled: Vec<usize> = progress[1..progress.len() - 1]
            .iter()
            .map(|(processed, _)| *processed)
            .collect();
        throttled.sort_unstable();
        assert_eq!(throttled, vec![3, 6, 7]);
        assert_eq!(*reporter.finished.lock(), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_interval_larger_than_batch_writes_only_last() {
        let executor = BatchEvaluationExecutor::new(
            Arc::new(AcceptAll),
            Arc::new(FixedAnswers),
            BatchSettings {
                max_concurrent_items: 3,
                retry: RetryPolicy::linear(1, Duration::from_millis(1)),
                progress_interval: 20,
            },
        );
        let reporter = Arc::new(RecordingReporter::default());
        let ctx = ExecutionContext {
            task: batch_task(&[1, 2, 3, 4]).await,
            run_id: Uuid::new_v4(),
            caller: Arc::new(CallerIdentity::new("grader")),
            reporter: reporter.clone(),
            cancel: CancelSignal::new(),
        };

        executor.execute(ctx).await.unwrap();

        let progress = reporter.progress.lock().clone();
        assert_eq!(progress, vec![(0, 4), (4, 4), (4, 4)]);
    }
}
