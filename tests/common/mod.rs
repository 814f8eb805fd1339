//! Shared test harness: instrumented collaborators and engine helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use taskforge::config::TaskforgeConfig;
use taskforge::execution::batch::{
    AnswerEvaluator, AnswerItem, AnswerRepository, EvaluationVerdict, QuestionContext,
};
use taskforge::models::{CallerIdentity, Task, TaskId};
use taskforge::store::{InMemoryTaskStore, TaskStore};
use taskforge::{TaskEngine, TaskStatus};

/// Evaluator that records concurrency, attempts and callers.
///
/// Answers listed in `fail_first` fail that many attempts before succeeding
/// (`u32::MAX` fails forever). With `hold` set, every evaluation waits for a permit
/// on the hold gate before returning.
#[derive(Default)]
pub struct InstrumentedEvaluator {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    total_calls: AtomicUsize,
    attempts: DashMap<i64, u32>,
    fail_first: HashMap<i64, u32>,
    delay: Duration,
    hold: Option<Arc<Semaphore>>,
    callers: Mutex<Vec<CallerIdentity>>,
}

impl InstrumentedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, answer_id: i64, attempts: u32) -> Self {
        self.fail_first.insert(answer_id, attempts);
        self
    }

    pub fn always_failing(self, answer_id: i64) -> Self {
        self.failing(answer_id, u32::MAX)
    }

    /// Block every evaluation until `release` is called
    pub fn held(mut self) -> Self {
        self.hold = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(10_000);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, answer_id: i64) -> u32 {
        self.attempts.get(&answer_id).map_or(0, |a| *a)
    }

    pub fn callers(&self) -> Vec<CallerIdentity> {
        self.callers.lock().clone()
    }
}

#[async_trait]
impl AnswerEvaluator for InstrumentedEvaluator {
    async fn evaluate(
        &self,
        item: &AnswerItem,
        caller: &CallerIdentity,
    ) -> anyhow::Result<EvaluationVerdict> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.callers.lock().push(caller.clone());

        let attempt = {
            let mut entry = self.attempts.entry(item.answer_id).or_insert(0);
            *entry += 1;
            *entry
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(hold) = &self.hold {
            let _permit = hold.acquire().await?;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.fail_first.get(&item.answer_id) {
            Some(fails) if attempt <= *fails => {
                anyhow::bail!("evaluation service rejected answer {}", item.answer_id)
            }
            _ => Ok(EvaluationVerdict::success(
                0.75,
                format!("looks good: {}", item.answer_text),
            )),
        }
    }
}

/// Answers keyed by id, grouped by question and exam.
#[derive(Default)]
pub struct InMemoryAnswerRepository {
    answers: DashMap<i64, AnswerItem>,
    exam_of_question: DashMap<i64, i64>,
    updates: AtomicUsize,
}

impl InMemoryAnswerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` answers to question `question_id` of exam `exam_id`, ids starting at `first_id`
    pub fn with_answers(self, exam_id: i64, question_id: i64, first_id: i64, count: i64) -> Self {
        self.exam_of_question.insert(question_id, exam_id);
        for answer_id in first_id..first_id + count {
            let mut item = AnswerItem::new(answer_id, format!("answer {answer_id}"));
            item.student_id = Some(answer_id * 10);
            item.question_id = Some(question_id);
            item.question = Some(QuestionContext {
                question_id,
                prompt: format!("question {question_id}"),
                reference_answer: None,
                max_score: Some(1.0),
            });
            self.answers.insert(answer_id, item);
        }
        self
    }

    pub fn answer(&self, answer_id: i64) -> Option<AnswerItem> {
        self.answers.get(&answer_id).map(|item| item.clone())
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn ids_where(&self, include_evaluated: bool, keep: impl Fn(&AnswerItem) -> bool) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .answers
            .iter()
            .filter(|entry| keep(entry.value()))
            .filter(|entry| include_evaluated || !entry.value().is_evaluated())
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl AnswerRepository for InMemoryAnswerRepository {
    async fn answer_ids_for_question(
        &self,
        question_id: i64,
        include_evaluated: bool,
    ) -> anyhow::Result<Vec<i64>> {
        Ok(self.ids_where(include_evaluated, |item| {
            item.question_id == Some(question_id)
        }))
    }

    async fn answer_ids_for_exams(
        &self,
        exam_ids: &[i64],
        include_evaluated: bool,
    ) -> anyhow::Result<Vec<i64>> {
        Ok(self.ids_where(include_evaluated, |item| {
            item.question_id
                .and_then(|question_id| self.exam_of_question.get(&question_id).map(|e| *e))
                .is_some_and(|exam_id| exam_ids.contains(&exam_id))
        }))
    }

    async fn fetch_with_dependencies(&self, answer_ids: &[i64]) -> anyhow::Result<Vec<AnswerItem>> {
        Ok(answer_ids
            .iter()
            .filter_map(|id| self.answers.get(id).map(|item| item.clone()))
            .collect())
    }

    async fn update_item(&self, answer_id: i64, item: &AnswerItem) -> anyhow::Result<()> {
        self.answers.insert(answer_id, item.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Defaults with fast retries and a progress write on every completion
pub fn test_config(max_concurrent_items: usize) -> TaskforgeConfig {
    let mut config = TaskforgeConfig::default();
    config.engine.max_concurrent_items = max_concurrent_items;
    config.engine.retry_base_delay_ms = 5;
    config.engine.progress_report_interval = 1;
    config.engine.shutdown_timeout_ms = 2000;
    config
}

pub struct Harness {
    pub engine: TaskEngine,
    pub store: Arc<dyn TaskStore>,
    pub evaluator: Arc<InstrumentedEvaluator>,
    pub repository: Arc<InMemoryAnswerRepository>,
}

pub async fn harness(
    config: TaskforgeConfig,
    evaluator: InstrumentedEvaluator,
    repository: InMemoryAnswerRepository,
) -> Harness {
    let store: Arc<dyn TaskStore> = InMemoryTaskStore::arc();
    harness_with_store(config, evaluator, repository, store).await
}

pub async fn harness_with_store(
    config: TaskforgeConfig,
    evaluator: InstrumentedEvaluator,
    repository: InMemoryAnswerRepository,
    store: Arc<dyn TaskStore>,
) -> Harness {
    let evaluator = Arc::new(evaluator);
    let repository = Arc::new(repository);
    let engine = TaskEngine::builder(evaluator.clone(), repository.clone())
        .config(config)
        .store(Arc::clone(&store))
        .build()
        .await
        .expect("engine should build");

    Harness {
        engine,
        store,
        evaluator,
        repository,
    }
}

/// Poll until the task reaches a terminal status and no run is live
pub async fn wait_until_settled(harness: &Harness, task_id: &TaskId) -> Task {
    for _ in 0..1000 {
        let task = harness.store.get_task(task_id).await.expect("task exists");
        if task.status.is_terminal() && !harness.engine.registry().is_running(task_id) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} did not settle");
}

pub async fn wait_for_status(harness: &Harness, task_id: &TaskId, status: TaskStatus) -> Task {
    for _ in 0..1000 {
        let task = harness.store.get_task(task_id).await.expect("task exists");
        if task.status == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} never reached {status}");
}

pub async fn wait_for_in_flight(evaluator: &InstrumentedEvaluator, count: usize) {
    for _ in 0..1000 {
        if evaluator.in_flight() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("never reached {count} evaluations in flight");
}

pub async fn wait_until_idle(harness: &Harness, task_id: &TaskId) {
    for _ in 0..1000 {
        if !harness.engine.registry().is_running(task_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run of {task_id} never finished");
}
