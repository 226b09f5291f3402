//! # Compute Plan Status
//!
//! A plan's status is derived from the states of its tasks every time the plan is read, inside
//! the reading transaction. It is never stored, so it can never disagree with the task rows it
//! was computed from.

use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Row};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// State of one compute task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Todo,
    Doing,
    Done,
    Canceled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Todo => "TODO",
            TaskStatus::Doing => "DOING",
            TaskStatus::Done => "DONE",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(TaskStatus::Waiting),
            "TODO" => Ok(TaskStatus::Todo),
            "DOING" => Ok(TaskStatus::Doing),
            "DONE" => Ok(TaskStatus::Done),
            "CANCELED" => Ok(TaskStatus::Canceled),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(OrchestratorError::internal(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Waiting,
    Todo,
    Doing,
    Done,
    Failed,
    Canceled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Waiting => "WAITING",
            PlanStatus::Todo => "TODO",
            PlanStatus::Doing => "DOING",
            PlanStatus::Done => "DONE",
            PlanStatus::Failed => "FAILED",
            PlanStatus::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Task counts of one plan, by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub total: u64,
    pub waiting: u64,
    pub todo: u64,
    pub doing: u64,
    pub canceled: u64,
    pub failed: u64,
    pub done: u64,
}

impl TaskCounters {
    /// Count a plan's task states
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut counters = TaskCounters::default();
        for status in statuses {
            counters.add(status, 1);
        }
        counters
    }

    pub fn add(&mut self, status: TaskStatus, count: u64) {
        self.total += count;
        match status {
            TaskStatus::Waiting => self.waiting += count,
            TaskStatus::Todo => self.todo += count,
            TaskStatus::Doing => self.doing += count,
            TaskStatus::Done => self.done += count,
            TaskStatus::Canceled => self.canceled += count,
            TaskStatus::Failed => self.failed += count,
        }
    }

    /// Per-status counts never exceed the total
    pub fn is_consistent(&self) -> bool {
        self.waiting
            .checked_add(self.todo)
            .and_then(|sum| sum.checked_add(self.doing))
            .and_then(|sum| sum.checked_add(self.done))
            .and_then(|sum| sum.checked_add(self.canceled))
            .and_then(|sum| sum.checked_add(self.failed))
            .is_some_and(|sum| sum <= self.total)
    }

    pub fn status(&self) -> PlanStatus {
        derive_status(self)
    }
}

/// Plan status from task counters; the first matching rule wins.
///
/// 1. any failed task: FAILED
/// 2. any canceled task: CANCELED
/// 3. every task done: DONE
/// 4. every task waiting: WAITING
/// 5. some task not waiting, none doing: TODO
/// 6. otherwise: DOING
///
/// A plan without tasks is WAITING.
pub fn derive_status(counters: &TaskCounters) -> PlanStatus {
    if counters.failed > 0 {
        return PlanStatus::Failed;
    }
    if counters.canceled > 0 {
        return PlanStatus::Canceled;
    }
    if counters.total == 0 {
        return PlanStatus::Waiting;
    }
    if counters.total == counters.done {
        return PlanStatus::Done;
    }
    if counters.total == counters.waiting {
        return PlanStatus::Waiting;
    }
    if counters.waiting < counters.total && counters.doing == 0 {
        return PlanStatus::Todo;
    }
    PlanStatus::Doing
}

/// Count a plan's tasks as seen by the current transaction
pub async fn fetch_task_counters(
    conn: &mut PgConnection,
    channel: &str,
    compute_plan_key: Uuid,
) -> OrchestratorResult<TaskCounters> {
    let rows = sqlx::query(
        r#"
        SELECT status, COUNT(*) AS count
        FROM compute_tasks
        WHERE channel = $1 AND compute_plan_key = $2
        GROUP BY status
        "#,
    )
    .bind(channel)
    .bind(compute_plan_key)
    .fetch_all(&mut *conn)
    .await?;

    let mut counters = TaskCounters::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("count")?;
        counters.add(status.parse()?, u64::try_from(count).unwrap_or_default());
    }
    Ok(counters)
}
