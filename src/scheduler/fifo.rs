use super::{ExecutionScheduler, ExecutionToken};
use crate::error::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// A request waiting for its token
#[derive(Debug)]
struct PendingJob {
    sequence: u64,
    /// Taken when the token is handed over; the job stays queued until it is released
    grant: Option<oneshot::Sender<ExecutionToken>>,
}

#[derive(Debug, Default)]
struct FifoShared {
    queue: Mutex<VecDeque<PendingJob>>,
    not_empty: Notify,
    closed: AtomicBool,
    next_sequence: AtomicU64,
}

/// Strict FIFO scheduler with a single background worker.
///
/// The worker waits for a non-empty queue, hands a token to the job at the front, waits for
/// that token to be released, removes the job and repeats. It only exits on
/// [`FifoScheduler::shutdown`] or when the scheduler is dropped.
#[derive(Debug)]
pub struct FifoScheduler {
    shared: Arc<FifoShared>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FifoScheduler {
    /// Create the scheduler and spawn its worker on the current runtime
    pub fn start() -> Self {
        let shared = Arc::new(FifoShared::default());
        let (stop, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(shared.clone(), stop_rx));

        info!("🚦 SCHEDULER: FIFO admission worker started");

        Self {
            shared,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Jobs in the queue, including the one currently holding the token
    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

#[async_trait]
impl ExecutionScheduler for FifoScheduler {
    async fn acquire(&self) -> OrchestratorResult<ExecutionToken> {
        let (grant, granted) = oneshot::channel();
        let sequence = {
            let mut queue = self.shared.queue.lock();
            // Checked under the lock so nothing is queued after shutdown cleared the queue
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(OrchestratorError::internal("execution scheduler is shut down"));
            }
            // Sequence numbers follow queue order because both are assigned under the lock
            let sequence = self.shared.next_sequence.fetch_add(1, Ordering::Relaxed);
            queue.push_back(PendingJob {
                sequence,
                grant: Some(grant),
            });
            sequence
        };
        self.shared.not_empty.notify_one();
        trace!(sequence = sequence, "SCHEDULER: job queued");

        granted
            .await
            .map_err(|_| OrchestratorError::internal("execution scheduler is shut down"))
    }

    /// Stop the worker. Waiting callers fail; later `acquire` calls fail immediately.
    async fn shutdown(&self) {
        {
            let _queue = self.shared.queue.lock();
            self.shared.closed.store(true, Ordering::Release);
        }
        let _ = self.stop.send(true);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        // Dropping the grant senders wakes every waiter with an error
        let abandoned = {
            let mut queue = self.shared.queue.lock();
            let count = queue.len();
            queue.clear();
            count
        };
        info!(abandoned = abandoned, "🛑 SCHEDULER: FIFO admission worker stopped");
    }
}

async fn run_worker(shared: Arc<FifoShared>, mut stop: watch::Receiver<bool>) {
    loop {
        // 1. wait for a job at the front of the queue
        let front = {
            let mut queue = shared.queue.lock();
            queue
                .front_mut()
                .map(|job| (job.sequence, job.grant.take()))
        };
        let Some((sequence, grant)) = front else {
            tokio::select! {
                _ = shared.not_empty.notified() => continue,
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        };

        // 2. hand it a token
        let (release, released) = oneshot::channel();
        let handed_over = match grant {
            Some(grant) => grant
                .send(ExecutionToken::granted(sequence, release))
                .is_ok(),
            None => false,
        };

        if handed_over {
            debug!(sequence = sequence, "SCHEDULER: token granted");
            // 3. wait for release; a dropped sender counts as a release
            tokio::select! {
                _ = released => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        } else {
            debug!(sequence = sequence, "SCHEDULER: waiter gone, skipping job");
        }

        // 4. remove the job and move on
        shared.queue.lock().pop_front();
    }
}
