//! Ledger client: call-mode selection, retries and timeout-conflict reconciliation.
//!
//! A create submitted to the ledger can time out on the client after the ledger has already
//! committed it. The retry then fails with a conflict because the asset exists. For single-asset
//! creates the client treats "conflict right after a timeout" as proof the first attempt landed
//! and returns the asset read back by its key. Batch creates are never reconciled: which items of
//! the first attempt landed is unknown, so the conflict is returned.

use super::retry::RetryPolicy;
use super::transport::{CallMode, LedgerTransport};
use crate::classifier::MethodClassifier;
use crate::error::OrchestratorResult;
use crate::logging::log_reconciliation;
use crate::metrics;
use opentelemetry::KeyValue;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct LedgerClient {
    transport: Arc<dyn LedgerTransport>,
    classifier: Arc<dyn MethodClassifier>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LedgerClient {
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        classifier: Arc<dyn MethodClassifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            classifier,
            policy,
        }
    }

    pub fn mode_for(&self, method: &str) -> CallMode {
        CallMode::from(self.classifier.classify(method))
    }

    /// One call with retries; evaluate or submit according to the method table
    pub async fn call(&self, method: &str, payload: &[u8]) -> OrchestratorResult<Vec<u8>> {
        let mode = self.mode_for(method);
        self.policy
            .run(method, move |_| self.invoke(mode, method, payload))
            .await
    }

    /// Create one asset, reconciling a conflict that follows a timeout.
    ///
    /// `get_method` must read the asset by `key`; it is always evaluated.
    pub async fn create_single(
        &self,
        method: &str,
        payload: &[u8],
        get_method: &str,
        key: &str,
    ) -> OrchestratorResult<Vec<u8>> {
        let mode = self.mode_for(method);

        self.policy
            .run(method, move |state| async move {
                match self.invoke(mode, method, payload).await {
                    Err(err) if err.is_conflict() && state.previous_timed_out() => {
                        log_reconciliation(method, key, state.attempt);
                        metrics::ledger_reconciliations_total()
                            .add(1, &[KeyValue::new("method", method.to_string())]);
                        self.read_by_key(get_method, key).await
                    }
                    other => other,
                }
            })
            .await
    }

    /// Create several assets in one call; conflicts always propagate
    pub async fn create_batch(&self, method: &str, payload: &[u8]) -> OrchestratorResult<Vec<u8>> {
        let mode = self.mode_for(method);
        self.policy
            .run(method, move |_| self.invoke(mode, method, payload))
            .await
    }

    async fn read_by_key(&self, get_method: &str, key: &str) -> OrchestratorResult<Vec<u8>> {
        let request = serde_json::to_vec(&json!({ "key": key }))?;
        self.invoke(CallMode::Evaluate, get_method, &request).await
    }

    async fn invoke(
        &self,
        mode: CallMode,
        method: &str,
        payload: &[u8],
    ) -> OrchestratorResult<Vec<u8>> {
        debug!(method = %method, mode = %mode, "LEDGER: call");
        self.transport
            .call(mode, method, payload)
            .await
            .map_err(|err| err.into_error(method))
    }
}
