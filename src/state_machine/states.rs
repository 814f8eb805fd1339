use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status as persisted and broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Persisted, not yet started
    Pending,
    /// A run is executing (or about to)
    Running,
    /// Soft-paused; an in-flight run may still be finishing its items
    Paused,
    /// Every item succeeded
    Completed,
    /// Some items succeeded, some failed
    CompletedWithErrors,
    /// Nothing succeeded, or the run aborted
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::CompletedWithErrors,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Terminal for the current run. FAILED and CANCELLED can still be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed | Self::Cancelled
        )
    }

    /// A run may still be writing progress in this status.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid task status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_active_groups_are_disjoint() {
        for status in TaskStatus::ALL {
            assert!(!(status.is_terminal() && status.is_active()), "{status}");
        }
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Pending.is_active());
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(
            TaskStatus::CompletedWithErrors.to_string(),
            "COMPLETED_WITH_ERRORS"
        );
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&TaskStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let parsed: TaskStatus = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(parsed, TaskStatus::Paused);
    }
}
