//! Backend health probing.
//!
//! [`HealthMonitor`] issues a minimal round trip against a live handle and
//! classifies the result. It never returns an error: probe failures become
//! an `Unreachable` classification with the error text in the message
//! field, which is what lets the orchestrator report status without
//! exception handling at every call site.

use crate::db::pool::{EnginePool, RelationalPool};
use crate::document::DocumentStore;
use crate::models::ProbeOutcome;
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;

/// Classifies backend round trips against a latency budget.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    latency_budget_ms: u64,
}

impl HealthMonitor {
    pub fn new(latency_budget_ms: u64) -> Self {
        Self { latency_budget_ms }
    }

    /// Probe the relational pool with `SELECT 1`.
    ///
    /// The round trip is bounded by the pool's statement timeout (plus the
    /// pool's own acquire timeout inside it), so a hung backend classifies
    /// as unreachable instead of hanging the caller.
    pub async fn probe_relational(&self, pool: &RelationalPool) -> ProbeOutcome {
        let start = Instant::now();
        let probe = async {
            match pool.engine() {
                EnginePool::Postgres(p) => sqlx::query("SELECT 1").fetch_one(p).await.map(|_| ()),
                EnginePool::MySql(p) => sqlx::query("SELECT 1").fetch_one(p).await.map(|_| ()),
            }
        };

        let result = timeout(pool.statement_timeout(), probe).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(())) => self.classify_success(latency_ms),
            Ok(Err(e)) => ProbeOutcome::unreachable(latency_ms, e.to_string()),
            Err(_) => ProbeOutcome::unreachable(latency_ms, "probe timed out"),
        };

        debug!(
            backend = %pool.kind(),
            status = ?outcome.status,
            latency_ms,
            "Probe completed"
        );
        outcome
    }

    /// Probe the document store with a ping command.
    pub async fn probe_document(&self, store: &DocumentStore) -> ProbeOutcome {
        let start = Instant::now();
        let result = store.ping().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => self.classify_success(latency_ms),
            Err(e) => ProbeOutcome::unreachable(latency_ms, e.to_string()),
        }
    }

    fn classify_success(&self, latency_ms: u64) -> ProbeOutcome {
        if latency_ms <= self.latency_budget_ms {
            ProbeOutcome::healthy(latency_ms)
        } else {
            ProbeOutcome::degraded(
                latency_ms,
                format!(
                    "round trip {}ms exceeded {}ms budget",
                    latency_ms, self.latency_budget_ms
                ),
            )
        }
    }
}
