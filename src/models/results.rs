//! # Batch Results
//!
//! The payload a batch run persists into `Task::result_data`: an aggregate summary
//! plus one record per processed work item, kept for audit and UI replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemOutcomeStatus {
    Success,
    Failed,
}

/// Outcome of one work item after all of its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub item_id: i64,
    /// Who produced the item (the student for an answer).
    pub subject_id: Option<i64>,
    /// What the item answers (the question for an answer).
    pub target_id: Option<i64>,
    pub outcome_status: ItemOutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts beyond the first.
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl ItemRecord {
    pub fn is_success(&self) -> bool {
        self.outcome_status == ItemOutcomeStatus::Success
    }
}

/// Aggregate verdict computed from item counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchOutcome {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl BatchOutcome {
    /// No failures is a completion (including an empty run); failures with at least one
    /// success complete with errors; only failures is a failed run.
    pub fn from_counts(success_count: usize, failure_count: usize) -> Self {
        match (success_count, failure_count) {
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::CompletedWithErrors,
        }
    }

    pub fn to_status(self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::CompletedWithErrors => TaskStatus::CompletedWithErrors,
            Self::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_count: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Items never admitted because the run was cancelled.
    pub skipped_count: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub outcome: BatchOutcome,
    /// Admission stopped early because the run was cancelled
    #[serde(default)]
    pub cancelled: bool,
    pub completed_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn from_items(total_count: usize, items: &[ItemRecord], completed_at: DateTime<Utc>) -> Self {
        let success_count = items.iter().filter(|item| item.is_success()).count();
        let failure_count = items.len() - success_count;
        let processed_count = items.len();
        let rate = |count: usize| {
            if total_count == 0 {
                0.0
            } else {
                count as f64 / total_count as f64
            }
        };

        Self {
            total_count,
            processed_count,
            success_count,
            failure_count,
            skipped_count: total_count.saturating_sub(processed_count),
            success_rate: rate(success_count),
            failure_rate: rate(failure_count),
            outcome: BatchOutcome::from_counts(success_count, failure_count),
            cancelled: false,
            completed_at,
        }
    }
}

/// Persisted `resultData` of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultData {
    pub summary: BatchSummary,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(item_id: i64, status: ItemOutcomeStatus) -> ItemRecord {
        ItemRecord {
            item_id,
            subject_id: None,
            target_id: None,
            outcome_status: status,
            score: None,
            feedback: None,
            error: None,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_outcome_from_counts() {
        assert_eq!(BatchOutcome::from_counts(5, 0), BatchOutcome::Completed);
        assert_eq!(BatchOutcome::from_counts(0, 0), BatchOutcome::Completed);
        assert_eq!(
            BatchOutcome::from_counts(3, 1),
            BatchOutcome::CompletedWithErrors
        );
        assert_eq!(BatchOutcome::from_counts(0, 4), BatchOutcome::Failed);
    }

    #[test]
    fn test_summary_counts_and_rates() {
        let items = vec![
            record(1, ItemOutcomeStatus::Success),
            record(2, ItemOutcomeStatus::Success),
            record(3, ItemOutcomeStatus::Failed),
        ];
        let summary = BatchSummary::from_items(4, &items, Utc::now());

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.skipped_count, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.outcome, BatchOutcome::CompletedWithErrors);
    }
}
