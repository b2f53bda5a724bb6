use chrono::{DateTime, Utc};

use crate::ids::{IssueId, TaskId, VolumeId};

/// A queued or running task, as exposed over the API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskData {
    pub id: TaskId,
    pub action: String,
    pub display_title: String,
    pub volume_id: Option<VolumeId>,
    pub issue_id: Option<IssueId>,
    /// Who queued the task (api, planner, system).
    pub called_from: String,
    /// The current user-visible progress message.
    pub message: String,
}

/// A completed task, as recorded in the history table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskHistoryEntry {
    pub action: String,
    pub display_title: String,
    pub run_at: DateTime<Utc>,
}

/// A recurring task and when it runs next.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskPlanEntry {
    pub action: String,
    pub display_title: String,
    pub interval_seconds: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}
