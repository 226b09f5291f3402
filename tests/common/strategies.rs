use asset_orchestrator::models::{TaskCounters, TaskStatus};
use proptest::prelude::*;

pub fn task_status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Waiting),
        Just(TaskStatus::Todo),
        Just(TaskStatus::Doing),
        Just(TaskStatus::Done),
        Just(TaskStatus::Canceled),
        Just(TaskStatus::Failed),
    ]
}

/// Counters of a plan with up to 32 tasks
pub fn task_counters_strategy() -> impl Strategy<Value = TaskCounters> {
    prop::collection::vec(task_status_strategy(), 0..32).prop_map(TaskCounters::from_statuses)
}

/// Counters of a plan whose tasks are neither failed nor canceled
pub fn healthy_counters_strategy() -> impl Strategy<Value = TaskCounters> {
    prop::collection::vec(
        prop_oneof![
            Just(TaskStatus::Waiting),
            Just(TaskStatus::Todo),
            Just(TaskStatus::Doing),
            Just(TaskStatus::Done),
        ],
        1..32,
    )
    .prop_map(TaskCounters::from_statuses)
}
