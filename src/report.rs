use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The task's own configuration asked it not to run.
    Requested,
    /// An upstream task failed or was skipped for the same reason.
    UpstreamFailed { upstream: String },
    /// The run was cancelled before the task started.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Warehouse,
    Load,
    Validation,
    /// The task's worker died before producing a result.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Tables named by a failed data-quality task; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing_tables: Vec<String>,
}

impl From<&TaskError> for ErrorInfo {
    fn from(err: &TaskError) -> Self {
        let failing_tables = match err {
            TaskError::Validation(failure) => failure.failing_tables(),
            _ => Vec::new(),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            failing_tables,
        }
    }
}

/// Terminal result of one task in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub attempt_count: u32,
    #[serde(default)]
    pub rows_affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl Outcome {
    pub fn success(attempt_count: u32, rows_affected: u64) -> Self {
        Self {
            status: TaskStatus::Success,
            error: None,
            attempt_count,
            rows_affected,
            skip_reason: None,
        }
    }

    pub fn failed(attempt_count: u32, error: ErrorInfo) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error),
            attempt_count,
            rows_affected: 0,
            skip_reason: None,
        }
    }

    pub fn skipped(reason: SkipReason, attempt_count: u32) -> Self {
        Self {
            status: TaskStatus::Skipped,
            error: None,
            attempt_count,
            rows_affected: 0,
            skip_reason: Some(reason),
        }
    }

    /// Whether tasks downstream of this one must not run. A task that
    /// skipped itself on request does not hold anything back.
    pub fn blocks_downstream(&self) -> bool {
        match self.status {
            TaskStatus::Success => false,
            TaskStatus::Failed => true,
            TaskStatus::Skipped => self.skip_reason != Some(SkipReason::Requested),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
    /// Cancelled with no task failures; never reported as success.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, Outcome>,
    /// Task ids in the order they reached a terminal state.
    pub execution_order: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn outcome(&self, task_id: &str) -> Option<&Outcome> {
        self.outcomes.get(task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.outcome(task_id).map(|o| o.status)
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn summary(&self) -> String {
        let mut result = format!("run {} finished {:?}\n", self.run_id, self.status);

        for (i, id) in self.execution_order.iter().enumerate() {
            let Some(outcome) = self.outcomes.get(id) else {
                continue;
            };
            result.push_str(&format!(
                "{}. {} {:?} (attempts: {})",
                i + 1,
                id,
                outcome.status,
                outcome.attempt_count
            ));
            if let Some(error) = &outcome.error {
                result.push_str(&format!(": {}", error.message));
            }
            result.push('\n');
        }

        result
    }
}
