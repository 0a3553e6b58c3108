//! Recurring task definitions.

use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Outcome of a task's most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring task. Each due tick enqueues one job of `task_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,

    /// Unique name
    pub task_name: String,

    /// Job type to enqueue
    pub task_type: String,

    #[serde(flatten)]
    pub schedule: Schedule,

    /// Payload for every enqueued job
    pub payload_template: Value,

    pub enabled: bool,

    /// Unset means due on the next tick
    pub next_run_at: Option<DateTime<Utc>>,

    pub last_run_at: Option<DateTime<Utc>>,

    pub last_run_status: Option<RunStatus>,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// A new enabled task that is due immediately.
    pub fn new(
        task_name: impl Into<String>,
        task_type: impl Into<String>,
        schedule: Schedule,
        payload_template: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            task_type: task_type.into(),
            schedule,
            payload_template,
            enabled: true,
            next_run_at: None,
            last_run_at: None,
            last_run_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Start disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Defer the first run.
    pub fn first_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_none_or(|next| next <= now)
    }

    pub fn record(&mut self, run: &TaskRun) {
        self.last_run_at = Some(run.ran_at);
        self.next_run_at = Some(run.next_run_at);
        self.last_run_status = Some(run.status);
        self.last_error = run.error.clone();
        self.updated_at = run.ran_at;
    }
}

/// One entry read by [`TaskStore::due`](crate::store::TaskStore::due).
#[derive(Debug, Clone, PartialEq)]
pub enum DueTask {
    Ready(ScheduledTask),
    /// A stored row whose definition no longer decodes
    Invalid {
        task_name: String,
        next_run_at: Option<DateTime<Utc>>,
        error: String,
    },
}

impl DueTask {
    pub fn task_name(&self) -> &str {
        match self {
            DueTask::Ready(task) => &task.task_name,
            DueTask::Invalid { task_name, .. } => task_name,
        }
    }
}

/// Bookkeeping written back after a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRun {
    pub ran_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub status: RunStatus,
    pub error: Option<String>,
}
