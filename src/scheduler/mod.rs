//! # Execution Admission Scheduler
//!
//! Serializes request execution into a single logical stream. A request may only touch shared
//! state while it holds an [`ExecutionToken`]; at most one token is outstanding at a time and
//! tokens are granted in arrival order.
//!
//! Release is tied to the token's lifetime: dropping the token (including during unwinding)
//! releases it, so no exit path can leave the worker waiting forever.
//!
//! Two schedulers share the [`ExecutionScheduler`] interface:
//!
//! - [`FifoScheduler`] queues requests and grants one token at a time from a background worker
//! - [`ImmediateScheduler`] grants at once, for isolated or test execution

mod fifo;
mod immediate;

pub use fifo::FifoScheduler;
pub use immediate::ImmediateScheduler;

use crate::config::SchedulerMode;
use crate::error::OrchestratorResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

#[async_trait]
pub trait ExecutionScheduler: Send + Sync {
    /// Wait until this caller may execute
    async fn acquire(&self) -> OrchestratorResult<ExecutionToken>;

    /// Stop granting tokens; pending and later `acquire` calls fail
    async fn shutdown(&self) {}
}

/// Build the scheduler selected by configuration
pub fn from_mode(mode: SchedulerMode) -> Arc<dyn ExecutionScheduler> {
    match mode {
        SchedulerMode::Serialized => Arc::new(FifoScheduler::start()),
        SchedulerMode::Immediate => Arc::new(ImmediateScheduler::new()),
    }
}

/// Run `work` while holding a token; the token is released on every exit path
///
/// ```rust
/// use asset_orchestrator::scheduler::{run_exclusive, ImmediateScheduler};
///
/// # tokio_test::block_on(async {
/// let scheduler = ImmediateScheduler::new();
/// let answer = run_exclusive(&scheduler, async { Ok(42) }).await.unwrap();
/// assert_eq!(answer, 42);
/// # });
/// ```
pub async fn run_exclusive<S, F, T>(scheduler: &S, work: F) -> OrchestratorResult<T>
where
    S: ExecutionScheduler + ?Sized,
    F: Future<Output = OrchestratorResult<T>>,
{
    let token = scheduler.acquire().await?;
    let result = work.await;
    token.release();
    result
}

/// Permission for exactly one request to execute
#[must_use = "dropping the token releases it immediately"]
#[derive(Debug)]
pub struct ExecutionToken {
    sequence: u64,
    release: Option<oneshot::Sender<()>>,
}

impl ExecutionToken {
    pub(crate) fn granted(sequence: u64, release: oneshot::Sender<()>) -> Self {
        Self {
            sequence,
            release: Some(release),
        }
    }

    pub(crate) fn unscheduled(sequence: u64) -> Self {
        Self {
            sequence,
            release: None,
        }
    }

    /// Arrival sequence number of the request holding this token
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn release(self) {
        // Drop does the signalling
    }

    fn signal_release(&mut self) {
        if let Some(release) = self.release.take() {
            // The worker may already be gone after shutdown
            let _ = release.send(());
        }
    }
}

impl Drop for ExecutionToken {
    fn drop(&mut self) {
        self.signal_release();
    }
}
