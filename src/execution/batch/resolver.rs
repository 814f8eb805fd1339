//! Turns an evaluation scope into the concrete answer set, once, before fan-out.

use std::collections::HashSet;
use tracing::debug;

use super::collaborators::{AnswerItem, AnswerRepository};
use crate::error::{Result, TaskforgeError};
use crate::models::EvaluationScope;

/// Resolve the answer ids selected by `scope` and load them.
///
/// Duplicate ids are collapsed keeping first-seen order. An empty result is a
/// resolution error: a batch with nothing to do fails instead of completing.
pub async fn resolve_items(
    repository: &dyn AnswerRepository,
    scope: &EvaluationScope,
) -> Result<Vec<AnswerItem>> {
    let ids = match scope {
        EvaluationScope::AnswerIds { answer_ids } => answer_ids.clone(),
        EvaluationScope::Question {
            question_id,
            evaluate_all,
        } => repository
            .answer_ids_for_question(*question_id, *evaluate_all)
            .await
            .map_err(resolution_error)?,
        EvaluationScope::Exam {
            exam_id,
            evaluate_all,
        } => repository
            .answer_ids_for_exams(std::slice::from_ref(exam_id), *evaluate_all)
            .await
            .map_err(resolution_error)?,
        EvaluationScope::Exams {
            exam_ids,
            evaluate_all,
        } => repository
            .answer_ids_for_exams(exam_ids, *evaluate_all)
            .await
            .map_err(resolution_error)?,
    };

    let ids = dedupe(ids);
    if ids.is_empty() {
        return Err(TaskforgeError::Resolution(format!(
            "no answers found for {}",
            scope.describe()
        )));
    }

    let items = repository
        .fetch_with_dependencies(&ids)
        .await
        .map_err(resolution_error)?;

    let mut seen = HashSet::with_capacity(items.len());
    let items: Vec<AnswerItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.answer_id))
        .collect();

    if items.is_empty() {
        return Err(TaskforgeError::Resolution(format!(
            "none of the {} selected answer(s) could be loaded",
            ids.len()
        )));
    }

    debug!(
        requested = ids.len(),
        loaded = items.len(),
        scope = %scope.describe(),
        "Resolved work items"
    );
    Ok(items)
}

fn dedupe(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn resolution_error(err: anyhow::Error) -> TaskforgeError {
    TaskforgeError::Resolution(format!("{err:#}"))
}
