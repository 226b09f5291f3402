//! # Request Context
//!
//! Identity carried by every RPC call: the fully-qualified method name, the calling
//! organization and the channel (tenant) the call is scoped to.

use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key holding the caller's organization (MSP) identifier
pub const CALLER_METADATA_KEY: &str = "mspid";
/// Metadata key holding the channel the call is scoped to
pub const CHANNEL_METADATA_KEY: &str = "channel";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    method: String,
    caller: String,
    channel: String,
}

impl RequestContext {
    pub fn new(
        method: impl Into<String>,
        caller: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            caller: caller.into(),
            channel: channel.into(),
        }
    }

    /// Build from call metadata; both identity keys are mandatory
    pub fn from_metadata(
        method: impl Into<String>,
        metadata: &HashMap<String, String>,
    ) -> OrchestratorResult<Self> {
        let required = |key: &str| {
            metadata
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    OrchestratorError::validation(format!("missing '{key}' in call metadata"))
                })
        };

        Ok(Self {
            method: method.into(),
            caller: required(CALLER_METADATA_KEY)?,
            channel: required(CHANNEL_METADATA_KEY)?,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}
