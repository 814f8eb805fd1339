//! Batch evaluation: resolve a scope to answers, evaluate them under a concurrency
//! cap with per-answer retries, aggregate the outcome.

pub mod collaborators;
pub mod executor;
pub mod resolver;
pub mod retry;

pub use collaborators::{
    AnswerEvaluator, AnswerItem, AnswerRepository, EvaluationVerdict, QuestionContext,
};
pub use executor::{BatchEvaluationExecutor, BatchSettings};
pub use resolver::resolve_items;
pub use retry::RetryPolicy;
