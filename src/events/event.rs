use crate::error::{OrchestratorError, OrchestratorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// What happened to the asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AssetCreated,
    AssetUpdated,
    AssetDisabled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AssetCreated => "ASSET_CREATED",
            EventKind::AssetUpdated => "ASSET_UPDATED",
            EventKind::AssetDisabled => "ASSET_DISABLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    Organization,
    Function,
    DataManager,
    DataSample,
    ComputePlan,
    ComputeTask,
    Model,
    Performance,
    FailureReport,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Organization => "ORGANIZATION",
            AssetKind::Function => "FUNCTION",
            AssetKind::DataManager => "DATA_MANAGER",
            AssetKind::DataSample => "DATA_SAMPLE",
            AssetKind::ComputePlan => "COMPUTE_PLAN",
            AssetKind::ComputeTask => "COMPUTE_TASK",
            AssetKind::Model => "MODEL",
            AssetKind::Performance => "PERFORMANCE",
            AssetKind::FailureReport => "FAILURE_REPORT",
        }
    }
}

/// A published domain fact.
///
/// Fields are fixed at construction; consumers de-duplicate redeliveries on [`Event::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    kind: EventKind,
    asset_kind: AssetKind,
    asset_key: String,
    channel: String,
    timestamp: DateTime<Utc>,
    asset: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        asset_kind: AssetKind,
        asset_key: impl Into<String>,
        channel: impl Into<String>,
        asset: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            asset_kind,
            asset_key: asset_key.into(),
            channel: channel.into(),
            timestamp: Utc::now(),
            asset,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry (builder style, before the event is enqueued)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn asset_kind(&self) -> AssetKind {
        self.asset_kind
    }

    pub fn asset_key(&self) -> &str {
        &self.asset_key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn asset(&self) -> &Value {
        &self.asset
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Broker payload (JSON bytes)
    pub fn to_payload(&self) -> OrchestratorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode bytes received from outside; malformed input is a validation error
    pub fn from_payload(bytes: &[u8]) -> OrchestratorResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| OrchestratorError::validation(format!("malformed event payload: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_preserves_identity() {
        let event = Event::new(
            EventKind::AssetCreated,
            AssetKind::ComputeTask,
            "task-1",
            "mychannel",
            json!({"key": "task-1", "status": "WAITING"}),
        )
        .with_metadata("worker", "org-a");

        let decoded = Event::from_payload(&event.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.metadata().get("worker").map(String::as_str), Some("org-a"));
    }

    #[test]
    fn test_malformed_payload_is_validation_error() {
        let err = Event::from_payload(b"not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_wire_names() {
        let event = Event::new(
            EventKind::AssetDisabled,
            AssetKind::DataManager,
            "dm",
            "ch",
            Value::Null,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "ASSET_DISABLED");
        assert_eq!(value["asset_kind"], "DATA_MANAGER");
        assert!(value.get("metadata").is_none());
    }
}
