//! In-process store for isolated execution.
//!
//! Assets are JSON documents under string keys. A transaction reads from the snapshot taken when
//! it began and buffers its writes; commit applies them atomically. A read-write transaction
//! whose snapshot is older than the latest commit fails with a transient error, the same outcome a
//! SERIALIZABLE PostgreSQL transaction reports for conflicting concurrent writers.

use super::{StoreTransaction, TransactionMode, TransactionalStore};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    version: u64,
    assets: BTreeMap<String, Value>,
    journal: Vec<Event>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of one asset
    pub fn asset(&self, key: &str) -> Option<Value> {
        self.state.lock().assets.get(key).cloned()
    }

    pub fn asset_count(&self) -> usize {
        self.state.lock().assets.len()
    }

    /// Events journaled by committed transactions, in commit order
    pub fn journal(&self) -> Vec<Event> {
        self.state.lock().journal.clone()
    }

    /// Number of committed read-write transactions
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self, mode: TransactionMode) -> OrchestratorResult<MemoryTransaction> {
        let state = self.state.lock();
        Ok(MemoryTransaction {
            store: self.clone(),
            mode,
            base_version: state.version,
            snapshot: state.assets.clone(),
            writes: BTreeMap::new(),
            events: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryStore,
    mode: TransactionMode,
    base_version: u64,
    snapshot: BTreeMap<String, Value>,
    writes: BTreeMap<String, Value>,
    events: Vec<Event>,
}

impl MemoryTransaction {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.writes.get(key).or_else(|| self.snapshot.get(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Create a new asset; an existing key is a conflict
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> OrchestratorResult<()> {
        let key = key.into();
        if self.exists(&key) {
            return Err(OrchestratorError::conflict(format!(
                "asset {key} already exists"
            )));
        }
        self.put(key, value)
    }

    /// Replace an existing asset
    pub fn update(&mut self, key: impl Into<String>, value: Value) -> OrchestratorResult<()> {
        let key = key.into();
        if !self.exists(&key) {
            return Err(OrchestratorError::not_found(format!("asset {key}")));
        }
        self.put(key, value)
    }

    /// Every visible asset whose key starts with `prefix`, in key order
    pub fn scan(&self, prefix: &str) -> Vec<(String, Value)> {
        let mut merged: BTreeMap<&String, &Value> = self
            .snapshot
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .collect();
        merged.extend(
            self.writes
                .iter()
                .filter(|(key, _)| key.starts_with(prefix)),
        );
        merged
            .into_iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn put(&mut self, key: String, value: Value) -> OrchestratorResult<()> {
        if self.mode.is_read_only() {
            return Err(OrchestratorError::internal(
                "cannot execute a write in a read-only transaction",
            ));
        }
        self.writes.insert(key, value);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn record_events(&mut self, events: &[Event]) -> OrchestratorResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        if self.mode.is_read_only() {
            return Err(OrchestratorError::internal(
                "cannot journal events in a read-only transaction",
            ));
        }
        self.events.extend_from_slice(events);
        Ok(())
    }

    async fn commit(self) -> OrchestratorResult<()> {
        if self.writes.is_empty() && self.events.is_empty() {
            return Ok(());
        }

        let mut state = self.store.state.lock();
        if state.version != self.base_version {
            return Err(OrchestratorError::transient(
                "could not serialize access due to concurrent update",
            ));
        }
        state.version += 1;
        state.assets.extend(self.writes);
        state.journal.extend(self.events);
        Ok(())
    }

    async fn rollback(self) -> OrchestratorResult<()> {
        Ok(())
    }
}
