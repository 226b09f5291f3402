//! # Method Classification
//!
//! Maps fully-qualified RPC method names to read-only or read-write. The unit-of-work
//! coordinator uses it to pick a transaction isolation level, the ledger adapter to choose
//! between evaluate and submit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    ReadOnly,
    ReadWrite,
}

pub trait MethodClassifier: Send + Sync {
    fn classify(&self, method: &str) -> MethodKind;

    fn is_read_only(&self, method: &str) -> bool {
        self.classify(method) == MethodKind::ReadOnly
    }
}

/// Explicit classification table; methods it does not know are read-write
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodKind>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: impl Into<String>, kind: MethodKind) -> Self {
        self.methods.insert(method.into(), kind);
        self
    }

    pub fn read_only(self, method: impl Into<String>) -> Self {
        self.with(method, MethodKind::ReadOnly)
    }

    pub fn read_write(self, method: impl Into<String>) -> Self {
        self.with(method, MethodKind::ReadWrite)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, MethodKind)> for MethodTable {
    fn from_iter<I: IntoIterator<Item = (S, MethodKind)>>(iter: I) -> Self {
        Self {
            methods: iter.into_iter().map(|(m, k)| (m.into(), k)).collect(),
        }
    }
}

impl MethodClassifier for MethodTable {
    fn classify(&self, method: &str) -> MethodKind {
        self.methods
            .get(method)
            .copied()
            .unwrap_or(MethodKind::ReadWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_methods_are_read_write() {
        let table = MethodTable::new().read_only("/orchestrator.ModelService/GetModel");
        assert!(table.is_read_only("/orchestrator.ModelService/GetModel"));
        assert_eq!(
            table.classify("/orchestrator.ModelService/RegisterModel"),
            MethodKind::ReadWrite
        );
    }

    #[test]
    fn test_from_iterator() {
        let table: MethodTable = [
            ("/a/Query", MethodKind::ReadOnly),
            ("/a/Register", MethodKind::ReadWrite),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.len(), 2);
        assert!(table.is_read_only("/a/Query"));
    }
}
