use super::{ExecutionScheduler, ExecutionToken};
use crate::error::OrchestratorResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Grants every request at once without ordering or exclusion.
///
/// Only suitable where requests cannot contend, such as single-caller tools and tests.
#[derive(Debug, Default)]
pub struct ImmediateScheduler {
    next_sequence: AtomicU64,
}

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionScheduler for ImmediateScheduler {
    async fn acquire(&self) -> OrchestratorResult<ExecutionToken> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        Ok(ExecutionToken::unscheduled(sequence))
    }
}
