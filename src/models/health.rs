//! Health and pool status models.
//!
//! These are snapshot types: produced on demand, returned to the caller,
//! never persisted.

use crate::models::backend::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of one probe round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Round trip succeeded under the latency budget.
    Healthy,
    /// Round trip succeeded but over the latency budget.
    Degraded,
    /// Pool timeout, refused connection, or any transport failure.
    Unreachable,
}

impl ProbeStatus {
    pub fn is_up(&self) -> bool {
        !matches!(self, Self::Unreachable)
    }
}

/// Result of probing one backend. Never an error: failures are folded
/// into `status` and `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            status: ProbeStatus::Healthy,
            latency_ms,
            message: None,
        }
    }

    pub fn degraded(latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Degraded,
            latency_ms,
            message: Some(message.into()),
        }
    }

    pub fn unreachable(latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Unreachable,
            latency_ms,
            message: Some(message.into()),
        }
    }
}

/// Point-in-time probe results for every backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub backends: BTreeMap<BackendKind, ProbeOutcome>,
}

/// Pool introspection counters for one backend.
///
/// For the relational pool all five fields are live values; the document
/// driver owns its pooling internally, so its entry carries the configured
/// bounds with the counters zeroed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_count: u32,
    pub idle_count: u32,
    pub waiting_count: u32,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Overall service health, derived from the per-backend picture. The
/// per-backend statuses are always reported alongside; this field never
/// hides a partial outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every backend probed healthy.
    Healthy,
    /// At least one backend is up; at least one is degraded or down.
    Degraded,
    /// No backend is reachable.
    Unhealthy,
}

/// The structured report returned by `health_check()`. Always produced,
/// even when every store is down.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    /// The active relational engine.
    pub database: BackendKind,
    pub timestamp: DateTime<Utc>,
    pub pool_status: BTreeMap<BackendKind, PoolStatus>,
    pub backends: BTreeMap<BackendKind, ProbeOutcome>,
}

/// Per-backend outcome of `initialize()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub relational: bool,
    pub document: bool,
    /// Logical OR of the per-backend outcomes.
    pub overall: bool,
}

impl InitReport {
    pub fn new(relational: bool, document: bool) -> Self {
        Self {
            relational,
            document,
            overall: relational || document,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_status_up() {
        assert!(ProbeStatus::Healthy.is_up());
        assert!(ProbeStatus::Degraded.is_up());
        assert!(!ProbeStatus::Unreachable.is_up());
    }

    #[test]
    fn test_init_report_overall_is_or() {
        assert!(InitReport::new(true, false).overall);
        assert!(InitReport::new(false, true).overall);
        assert!(!InitReport::new(false, false).overall);
    }

    #[test]
    fn test_probe_outcome_constructors() {
        let ok = ProbeOutcome::healthy(12);
        assert_eq!(ok.status, ProbeStatus::Healthy);
        assert!(ok.message.is_none());

        let down = ProbeOutcome::unreachable(0, "connection refused");
        assert_eq!(down.status, ProbeStatus::Unreachable);
        assert_eq!(down.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_health_record_serializes_kind_keys() {
        let mut backends = BTreeMap::new();
        backends.insert(BackendKind::RelationalPrimary, ProbeOutcome::healthy(5));
        backends.insert(
            BackendKind::Document,
            ProbeOutcome::unreachable(0, "refused"),
        );
        let record = HealthRecord {
            timestamp: Utc::now(),
            backends,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["backends"]["relational-primary"]["status"] == "healthy");
        assert!(json["backends"]["document"]["status"] == "unreachable");
    }
}
