//! # Process Health
//!
//! Process-wide health signal consumed by liveness probes. Severity only ever increases:
//! once event delivery or ledger connectivity is lost the process is expected to be
//! restarted by its supervisor, so there is no transition back to healthy.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy = 0,
    /// Serving, but some committed writes may not have produced their events
    Degraded = 1,
    /// Must stop receiving traffic
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

impl HealthStatus {
    /// Liveness: the process should keep receiving traffic
    pub fn is_live(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub component: String,
    pub status: HealthStatus,
    pub reason: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
}

#[derive(Debug)]
pub struct ProcessHealth {
    state: AtomicU8,
    issues: Mutex<Vec<HealthIssue>>,
}

impl Default for ProcessHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHealth {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HealthStatus::Healthy as u8),
            issues: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    pub fn mark_degraded(&self, component: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(component = %component, reason = %reason, "🟡 HEALTH: degraded");
        self.record(component, HealthStatus::Degraded, reason);
    }

    pub fn mark_unhealthy(&self, component: &str, reason: impl Into<String>) {
        let reason = reason.into();
        error!(component = %component, reason = %reason, "🔴 HEALTH: unhealthy");
        self.record(component, HealthStatus::Unhealthy, reason);
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            issues: self.issues.lock().clone(),
        }
    }

    fn record(&self, component: &str, status: HealthStatus, reason: String) {
        self.state.fetch_max(status as u8, Ordering::AcqRel);
        self.issues.lock().push(HealthIssue {
            component: component.to_string(),
            status,
            reason,
            observed_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let health = ProcessHealth::new();
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert!(health.is_live());
        assert!(health.report().issues.is_empty());
    }

    #[test]
    fn test_severity_never_decreases() {
        let health = ProcessHealth::new();
        health.mark_unhealthy("delivery_session", "broker unreachable");
        health.mark_degraded("delivery_session", "dispatch failed");

        assert_eq!(health.status(), HealthStatus::Unhealthy);
        assert!(!health.is_live());

        let report = health.report();
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].component, "delivery_session");
    }

    #[test]
    fn test_degraded_is_still_live() {
        let health = ProcessHealth::new();
        health.mark_degraded("ledger", "connect failed for org-a");
        assert_eq!(health.status(), HealthStatus::Degraded);
        assert!(health.is_live());
    }
}
