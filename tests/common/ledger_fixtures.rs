use asset_orchestrator::classifier::MethodTable;
use asset_orchestrator::ledger::{
    CallMode, LedgerCallError, LedgerCallResult, LedgerConnector, LedgerTransport,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const REGISTER_ASSET: &str = "/orchestrator.ModelService/RegisterModel";
pub const REGISTER_ASSETS: &str = "/orchestrator.ModelService/RegisterModels";
pub const GET_ASSET: &str = "/orchestrator.ModelService/GetModel";

pub fn ledger_methods() -> MethodTable {
    MethodTable::new()
        .read_only(GET_ASSET)
        .read_write(REGISTER_ASSET)
        .read_write(REGISTER_ASSETS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub organization: String,
    pub mode: CallMode,
    pub method: String,
}

#[derive(Debug, Default)]
struct LedgerState {
    assets: HashMap<String, Value>,
    calls: Vec<RecordedCall>,
    /// Errors returned before the call executes
    failures: VecDeque<LedgerCallError>,
    /// Creates that commit but whose answer is lost
    timeouts_after_commit: usize,
}

/// Ledger stand-in keeping assets by key.
///
/// Creates take `{"key": ..}` or `{"assets": [{"key": ..}, ..]}` and fail with an
/// "already exists" error when any key is taken; reads take `{"key": ..}`.
#[derive(Debug, Clone, Default)]
pub struct FakeLedger {
    state: Arc<Mutex<LedgerState>>,
    organization: String,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next calls with these errors, without executing them
    pub fn fail_next(&self, errors: impl IntoIterator<Item = LedgerCallError>) {
        self.state.lock().failures.extend(errors);
    }

    /// Commit the next `n` creates but report a timeout to the caller
    pub fn lose_next_create_answers(&self, n: usize) {
        self.state.lock().timeouts_after_commit = n;
    }

    pub fn put(&self, key: &str, asset: Value) {
        self.state.lock().assets.insert(key.to_string(), asset);
    }

    pub fn asset_count(&self) -> usize {
        self.state.lock().assets.len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    fn as_organization(&self, organization: &str) -> Self {
        Self {
            state: self.state.clone(),
            organization: organization.to_string(),
        }
    }

    fn create(state: &mut LedgerState, payload: &[u8]) -> LedgerCallResult {
        let request: Value = serde_json::from_slice(payload)
            .map_err(|err| LedgerCallError::Remote(format!("invalid request: {err}")))?;
        let assets: Vec<Value> = match request.get("assets") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![request],
        };

        let mut keys = Vec::with_capacity(assets.len());
        for asset in &assets {
            let key = asset
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| LedgerCallError::Remote("invalid request: missing key".into()))?;
            if state.assets.contains_key(key) {
                return Err(LedgerCallError::Remote(format!(
                    "asset {key} already exists"
                )));
            }
            keys.push(key.to_string());
        }
        for (key, asset) in keys.into_iter().zip(assets) {
            state.assets.insert(key, asset);
        }

        if state.timeouts_after_commit > 0 {
            state.timeouts_after_commit -= 1;
            return Err(LedgerCallError::Timeout(
                "no answer from the gateway".to_string(),
            ));
        }
        Ok(payload.to_vec())
    }

    fn get(state: &LedgerState, payload: &[u8]) -> LedgerCallResult {
        let request: Value = serde_json::from_slice(payload)
            .map_err(|err| LedgerCallError::Remote(format!("invalid request: {err}")))?;
        let key = request.get("key").and_then(Value::as_str).unwrap_or_default();
        state
            .assets
            .get(key)
            .map(|asset| asset.to_string().into_bytes())
            .ok_or_else(|| LedgerCallError::Remote(format!("asset {key} not found")))
    }
}

#[async_trait]
impl LedgerTransport for FakeLedger {
    async fn call(&self, mode: CallMode, method: &str, payload: &[u8]) -> LedgerCallResult {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            organization: self.organization.clone(),
            mode,
            method: method.to_string(),
        });
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        match method {
            GET_ASSET => Self::get(&state, payload),
            _ => Self::create(&mut state, payload),
        }
    }
}

#[async_trait]
impl LedgerConnector for FakeLedger {
    async fn connect(
        &self,
        organization: &str,
    ) -> Result<Arc<dyn LedgerTransport>, LedgerCallError> {
        Ok(Arc::new(self.as_organization(organization)))
    }
}
