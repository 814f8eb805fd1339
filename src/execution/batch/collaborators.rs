//! Upstream collaborators the batch executor consumes.
//!
//! Both are black boxes: their own retry and error semantics are opaque beyond
//! "may return an error" and "may report `success = false`". Errors are `anyhow`
//! because they come from code the engine does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CallerIdentity;

/// Question data an answer is evaluated against. Loaded with the answer so workers
/// never reach back into the repository mid-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionContext {
    pub question_id: i64,
    pub prompt: String,
    #[serde(default)]
    pub reference_answer: Option<String>,
    #[serde(default)]
    pub max_score: Option<f64>,
}

/// One answer to evaluate, fully loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerItem {
    pub answer_id: i64,
    pub student_id: Option<i64>,
    pub question_id: Option<i64>,
    pub answer_text: String,
    #[serde(default)]
    pub question: Option<QuestionContext>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl AnswerItem {
    pub fn new(answer_id: i64, answer_text: impl Into<String>) -> Self {
        Self {
            answer_id,
            student_id: None,
            question_id: None,
            answer_text: answer_text.into(),
            question: None,
            score: None,
            feedback: None,
            evaluated_at: None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated_at.is_some()
    }

    /// Copy of the answer with the verdict applied
    pub fn with_verdict(&self, verdict: &EvaluationVerdict, at: DateTime<Utc>) -> Self {
        Self {
            score: verdict.score,
            feedback: verdict.feedback.clone(),
            evaluated_at: Some(at),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationVerdict {
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EvaluationVerdict {
    pub fn success(score: f64, feedback: impl Into<String>) -> Self {
        Self {
            success: true,
            score: Some(score),
            feedback: Some(feedback.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            score: None,
            feedback: None,
            error: Some(error.into()),
        }
    }
}

/// The evaluation service (rate-limited downstream).
#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    /// Evaluate one answer on behalf of `caller`.
    async fn evaluate(
        &self,
        item: &AnswerItem,
        caller: &CallerIdentity,
    ) -> anyhow::Result<EvaluationVerdict>;
}

/// Where answers live.
#[async_trait]
pub trait AnswerRepository: Send + Sync {
    async fn answer_ids_for_question(
        &self,
        question_id: i64,
        include_evaluated: bool,
    ) -> anyhow::Result<Vec<i64>>;

    async fn answer_ids_for_exams(
        &self,
        exam_ids: &[i64],
        include_evaluated: bool,
    ) -> anyhow::Result<Vec<i64>>;

    /// Load answers with their question context. Unknown ids are left out.
    async fn fetch_with_dependencies(&self, answer_ids: &[i64]) -> anyhow::Result<Vec<AnswerItem>>;

    async fn update_item(&self, answer_id: i64, item: &AnswerItem) -> anyhow::Result<()>;
}
