//! # Models
//!
//! Derived views over asset state that the transactional core keeps consistent.

pub mod plan_status;

pub use plan_status::{derive_status, fetch_task_counters, PlanStatus, TaskCounters, TaskStatus};
