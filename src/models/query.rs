use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::defaults::MAX_PAGE_SIZE;
use crate::state_machine::TaskStatus;

use super::task::Task;

/// Filter for task listings. Pages are zero-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: usize,
    pub size: usize,
}

impl TaskQuery {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn created_between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self.created_before = Some(before);
        self
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> usize {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.limit())
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
            && self
                .task_type
                .as_ref()
                .map_or(true, |task_type| task.task_type.eq_ignore_ascii_case(task_type))
            && self.created_after.map_or(true, |after| task.created_at >= after)
            && self.created_before.map_or(true, |before| task.created_at < before)
    }
}

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn slice(all: Vec<T>, page: usize, size: usize) -> Self {
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let total = all.len();
        let items = all
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect();
        Self {
            items,
            page,
            size,
            total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.size.max(1))
    }
}

/// Task counts grouped by status. Every status is present, zero when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: u64,
    pub by_status: BTreeMap<TaskStatus, u64>,
}

impl TaskStatistics {
    pub fn from_counts(counts: impl IntoIterator<Item = (TaskStatus, u64)>) -> Self {
        let mut by_status: BTreeMap<TaskStatus, u64> =
            TaskStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for (status, count) in counts {
            *by_status.entry(status).or_default() += count;
        }
        Self {
            total: by_status.values().sum(),
            by_status,
        }
    }

    pub fn count(&self, status: TaskStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
