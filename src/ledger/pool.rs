//! Per-organization ledger workers.
//!
//! Each organization identity gets one connection and one dedicated worker task that consumes its
//! request queue in FIFO order and answers each request over a one-shot channel. Workers are
//! created on first use.

use super::transport::{CallMode, LedgerCallError, LedgerCallResult, LedgerConnector, LedgerTransport};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::health::ProcessHealth;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HEALTH_COMPONENT: &str = "ledger";

struct LedgerRequest {
    mode: CallMode,
    method: String,
    payload: Vec<u8>,
    reply: oneshot::Sender<LedgerCallResult>,
}

/// Queue handle of one organization's worker; usable as a transport
#[derive(Debug, Clone)]
pub struct LedgerWorkerHandle {
    organization: String,
    sender: mpsc::Sender<LedgerRequest>,
}

impl LedgerWorkerHandle {
    pub fn organization(&self) -> &str {
        &self.organization
    }
}

impl std::fmt::Debug for LedgerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerRequest")
            .field("mode", &self.mode)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerTransport for LedgerWorkerHandle {
    async fn call(&self, mode: CallMode, method: &str, payload: &[u8]) -> LedgerCallResult {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(LedgerRequest {
                mode,
                method: method.to_string(),
                payload: payload.to_vec(),
                reply,
            })
            .await
            .map_err(|_| {
                LedgerCallError::Unavailable(format!(
                    "ledger worker for {} stopped",
                    self.organization
                ))
            })?;

        response.await.map_err(|_| {
            LedgerCallError::Unavailable(format!(
                "ledger worker for {} dropped the request",
                self.organization
            ))
        })?
    }
}

pub struct LedgerPool {
    connector: Arc<dyn LedgerConnector>,
    health: Arc<ProcessHealth>,
    queue_capacity: usize,
    workers: DashMap<String, LedgerWorkerHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes worker creation so an organization is connected once
    creating: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    stop: watch::Sender<bool>,
}

impl std::fmt::Debug for LedgerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerPool")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl LedgerPool {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        health: Arc<ProcessHealth>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            connector,
            health,
            queue_capacity: queue_capacity.max(1),
            workers: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            creating: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            stop: watch::channel(false).0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The worker for `organization`, connecting it on first use
    pub async fn worker(&self, organization: &str) -> OrchestratorResult<LedgerWorkerHandle> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::internal("ledger pool is shut down"));
        }
        if let Some(handle) = self.workers.get(organization) {
            return Ok(handle.clone());
        }

        let _creating = self.creating.lock().await;
        if let Some(handle) = self.workers.get(organization) {
            return Ok(handle.clone());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::internal("ledger pool is shut down"));
        }

        let transport = match self.connector.connect(organization).await {
            Ok(transport) => transport,
            Err(err) => {
                self.health.mark_degraded(
                    HEALTH_COMPONENT,
                    format!("cannot connect {organization} to the ledger: {err}"),
                );
                return Err(OrchestratorError::transient(format!(
                    "ledger connection for {organization} failed: {err}"
                )));
            }
        };

        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let task = tokio::spawn(run_worker(
            organization.to_string(),
            transport,
            receiver,
            self.stop.subscribe(),
        ));
        self.tasks.lock().push(task);

        let handle = LedgerWorkerHandle {
            organization: organization.to_string(),
            sender,
        };
        self.workers.insert(organization.to_string(), handle.clone());
        info!(organization = %organization, "🔗 LEDGER: worker started");
        Ok(handle)
    }

    /// Stop every worker after it has answered the requests already queued
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        {
            let _creating = self.creating.lock().await;
            self.workers.clear();
        }
        self.stop.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "🔗 LEDGER: worker task failed");
            }
        }
        info!(workers = count, "🔗 LEDGER: pool shut down");
    }
}

async fn run_worker(
    organization: String,
    transport: Arc<dyn LedgerTransport>,
    mut receiver: mpsc::Receiver<LedgerRequest>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = receiver.recv() => match request {
                Some(request) => handle(&organization, transport.as_ref(), request).await,
                None => break,
            },
            _ = stop_requested(&mut stop) => {
                // Refuse new requests but answer the queued ones
                receiver.close();
                while let Some(request) = receiver.recv().await {
                    handle(&organization, transport.as_ref(), request).await;
                }
                break;
            }
        }
    }
    debug!(organization = %organization, "LEDGER: worker stopped");
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn handle(organization: &str, transport: &dyn LedgerTransport, request: LedgerRequest) {
    debug!(
        organization = %organization,
        method = %request.method,
        mode = %request.mode,
        "LEDGER: worker handling request"
    );
    let result = transport
        .call(request.mode, &request.method, &request.payload)
        .await;
    // The caller may have given up waiting
    let _ = request.reply.send(result);
}
