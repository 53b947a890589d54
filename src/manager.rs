//! Connection orchestration.
//!
//! [`ConnectionManager`] owns the relational pool and the document client
//! side by side and drives the per-backend lifecycle:
//!
//! ```text
//! uninitialized -> connecting -> { connected | unreachable }
//! connected  --failed probe-->  degraded
//! degraded   --failures beyond budget-->  unreachable
//! degraded | unreachable  --healthy probe-->  connected
//! ```
//!
//! `initialize()` runs both backends concurrently and independently; one
//! backend failing never blocks or fails the other. Per-backend state is
//! written only here, and reconnection is serialized through a per-backend
//! mutex so concurrent probe failures cannot stampede an already-loaded
//! backend. The manager is an explicit instance passed by reference to
//! collaborators; it has no global state and the embedding process owns
//! calling `initialize()` and `shutdown()`.

use crate::config::{ConfigResolver, OrchestratorOptions};
use crate::db::executor;
use crate::db::pool::RelationalPool;
use crate::db::transaction::{TransactionCoordinator, TxHandle};
use crate::document::DocumentStore;
use crate::error::{StoreError, StoreResult};
use crate::health::HealthMonitor;
use crate::models::{
    BackendDescriptor, BackendKind, ConnectionState, ConnectionStatus, ExecuteResult,
    HealthRecord, HealthReport, InitReport, OverallStatus, PoolStatus, ProbeOutcome,
    ProbeStatus, QueryParam, QueryRequest, QueryResult, StateTransition,
};
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

struct RelationalSlot {
    state: ConnectionState,
    pool: Option<Arc<RelationalPool>>,
}

struct DocumentSlot {
    state: ConnectionState,
    store: Option<Arc<DocumentStore>>,
}

/// Orchestrator for every managed backend.
pub struct ConnectionManager {
    relational_descriptor: BackendDescriptor,
    document_descriptor: BackendDescriptor,
    options: OrchestratorOptions,
    monitor: HealthMonitor,
    relational: RwLock<RelationalSlot>,
    document: RwLock<DocumentSlot>,
    /// Serializes connect/reconnect per backend.
    relational_reconnect: Mutex<()>,
    document_reconnect: Mutex<()>,
    events: broadcast::Sender<StateTransition>,
}

impl ConnectionManager {
    /// Build a manager from resolved configuration. Descriptors are fixed
    /// here; `initialize()` establishes the actual connections.
    pub fn new(resolver: &ConfigResolver) -> Self {
        let relational_descriptor = resolver.resolve(resolver.relational_kind());
        let document_descriptor = resolver.resolve(BackendKind::Document);
        let options = resolver.orchestrator_options();
        let (events, _) = broadcast::channel(32);

        Self {
            relational_descriptor,
            document_descriptor,
            monitor: HealthMonitor::new(options.latency_budget_ms),
            options,
            relational: RwLock::new(RelationalSlot {
                state: ConnectionState::new(),
                pool: None,
            }),
            document: RwLock::new(DocumentSlot {
                state: ConnectionState::new(),
                store: None,
            }),
            relational_reconnect: Mutex::new(()),
            document_reconnect: Mutex::new(()),
            events,
        }
    }

    /// Build a manager from a fresh snapshot of the process environment.
    pub fn from_env() -> Self {
        Self::new(&ConfigResolver::from_env())
    }

    /// The active relational engine.
    pub fn active_backend(&self) -> BackendKind {
        self.relational_descriptor.kind
    }

    /// Subscribe to state-machine transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.events.subscribe()
    }

    fn emit(&self, backend: BackendKind, from: ConnectionStatus, to: ConnectionStatus) {
        if from != to {
            debug!(backend = %backend, from = %from, to = %to, "State transition");
            let _ = self.events.send(StateTransition { backend, from, to });
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Establish both backends concurrently and independently.
    ///
    /// Idempotent: a backend that is already connected is left untouched,
    /// so calling this twice never creates a second live pool.
    pub async fn initialize(&self) -> InitReport {
        info!(
            relational = %self.relational_descriptor.kind,
            document = %self.document_descriptor.kind,
            "Initializing data stores"
        );

        let (relational, document) = tokio::join!(self.init_relational(), self.init_document());
        let report = InitReport::new(relational, document);

        info!(
            relational = report.relational,
            document = report.document,
            overall = report.overall,
            "Initialization complete"
        );
        report
    }

    async fn init_relational(&self) -> bool {
        if self.relational_connected().await {
            debug!(backend = %self.relational_descriptor.kind, "Already connected, skipping");
            return true;
        }
        let _guard = self.relational_reconnect.lock().await;
        // A concurrent initializer may have finished while we waited.
        if self.relational_connected().await {
            return true;
        }
        self.establish_relational().await
    }

    async fn init_document(&self) -> bool {
        if self.document_connected().await {
            debug!(backend = %self.document_descriptor.kind, "Already connected, skipping");
            return true;
        }
        let _guard = self.document_reconnect.lock().await;
        if self.document_connected().await {
            return true;
        }
        self.establish_document().await
    }

    async fn relational_connected(&self) -> bool {
        let slot = self.relational.read().await;
        slot.state.status == ConnectionStatus::Connected && slot.pool.is_some()
    }

    async fn document_connected(&self) -> bool {
        let slot = self.document.read().await;
        slot.state.status == ConnectionStatus::Connected && slot.store.is_some()
    }

    /// Bounded-retry connect for the relational backend. Caller must hold
    /// the reconnect guard.
    async fn establish_relational(&self) -> bool {
        let kind = self.relational_descriptor.kind;
        self.set_relational_status(ConnectionStatus::Connecting, None).await;

        // At most one live pool per backend: the old handle is fully
        // closed before a replacement is installed.
        let old = {
            let mut slot = self.relational.write().await;
            slot.pool.take()
        };
        if let Some(old) = old {
            info!(backend = %kind, "Releasing previous pool before reconnect");
            old.close().await;
        }

        let mut delay = self.options.retry_delay;
        for attempt in 1..=self.options.init_attempts {
            {
                let mut slot = self.relational.write().await;
                slot.state.attempt_count = attempt;
            }

            match RelationalPool::connect(&self.relational_descriptor).await {
                Ok(pool) => {
                    let pool = Arc::new(pool);
                    let probe = self.monitor.probe_relational(&pool).await;
                    if probe.status.is_up() {
                        if let Some(version) = pool.server_version().await {
                            info!(backend = %kind, version = %version, "Connected");
                        }
                        {
                            let mut slot = self.relational.write().await;
                            slot.pool = Some(pool);
                        }
                        self.set_relational_status(ConnectionStatus::Connected, None).await;
                        return true;
                    }
                    warn!(
                        backend = %kind,
                        attempt,
                        message = ?probe.message,
                        "Pool established but probe failed"
                    );
                    pool.close().await;
                    let mut slot = self.relational.write().await;
                    slot.state.last_error = probe.message.clone();
                }
                Err(e @ StoreError::Config { .. }) => {
                    // Config problems do not improve with retries.
                    error!(backend = %kind, error = %e, "Configuration error");
                    self.set_relational_status(
                        ConnectionStatus::Unreachable,
                        Some(e.to_string()),
                    )
                    .await;
                    return false;
                }
                Err(e) => {
                    warn!(backend = %kind, attempt, error = %e, "Connection attempt failed");
                    let mut slot = self.relational.write().await;
                    slot.state.last_error = Some(e.to_string());
                }
            }

            if attempt < self.options.init_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        error!(
            backend = %kind,
            attempts = self.options.init_attempts,
            "Exhausted connection attempts"
        );
        self.set_relational_status(ConnectionStatus::Unreachable, None).await;
        false
    }

    /// Bounded-retry connect for the document backend. Caller must hold
    /// the reconnect guard.
    async fn establish_document(&self) -> bool {
        let kind = self.document_descriptor.kind;
        self.set_document_status(ConnectionStatus::Connecting, None).await;

        let old = {
            let mut slot = self.document.write().await;
            slot.store.take()
        };
        if let Some(old) = old {
            info!(backend = %kind, "Releasing previous client before reconnect");
            old.shutdown().await;
        }

        let mut delay = self.options.retry_delay;
        for attempt in 1..=self.options.init_attempts {
            {
                let mut slot = self.document.write().await;
                slot.state.attempt_count = attempt;
            }

            match DocumentStore::connect(&self.document_descriptor).await {
                Ok(store) => {
                    let store = Arc::new(store);
                    if let Some(version) = store.server_version().await {
                        info!(backend = %kind, version = %version, "Connected");
                    }
                    {
                        let mut slot = self.document.write().await;
                        slot.store = Some(store);
                    }
                    self.set_document_status(ConnectionStatus::Connected, None).await;
                    return true;
                }
                Err(e @ StoreError::Config { .. }) => {
                    error!(backend = %kind, error = %e, "Configuration error");
                    self.set_document_status(
                        ConnectionStatus::Unreachable,
                        Some(e.to_string()),
                    )
                    .await;
                    return false;
                }
                Err(e) => {
                    warn!(backend = %kind, attempt, error = %e, "Connection attempt failed");
                    let mut slot = self.document.write().await;
                    slot.state.last_error = Some(e.to_string());
                }
            }

            if attempt < self.options.init_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        error!(
            backend = %kind,
            attempts = self.options.init_attempts,
            "Exhausted connection attempts"
        );
        self.set_document_status(ConnectionStatus::Unreachable, None).await;
        false
    }

    async fn set_relational_status(&self, to: ConnectionStatus, error: Option<String>) {
        let from = {
            let mut slot = self.relational.write().await;
            let from = slot.state.status;
            slot.state.status = to;
            if to == ConnectionStatus::Connected {
                slot.state.attempt_count = 0;
                slot.state.last_error = None;
            } else if let Some(e) = error {
                slot.state.last_error = Some(e);
            }
            from
        };
        self.emit(self.relational_descriptor.kind, from, to);
    }

    async fn set_document_status(&self, to: ConnectionStatus, error: Option<String>) {
        let from = {
            let mut slot = self.document.write().await;
            let from = slot.state.status;
            slot.state.status = to;
            if to == ConnectionStatus::Connected {
                slot.state.attempt_count = 0;
                slot.state.last_error = None;
            } else if let Some(e) = error {
                slot.state.last_error = Some(e);
            }
            from
        };
        self.emit(self.document_descriptor.kind, from, to);
    }

    // =========================================================================
    // Traffic
    // =========================================================================

    async fn relational_pool(&self) -> StoreResult<Arc<RelationalPool>> {
        let kind = self.relational_descriptor.kind;
        let slot = self.relational.read().await;
        if !slot.state.status.is_available() {
            return Err(StoreError::unavailable(
                kind.as_str(),
                slot.state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("status is {}", slot.state.status)),
            ));
        }
        slot.pool
            .clone()
            .ok_or_else(|| StoreError::unavailable(kind.as_str(), "no live pool"))
    }

    /// Execute a read query against the active relational backend.
    pub async fn query(&self, text: &str, params: &[QueryParam]) -> StoreResult<QueryResult> {
        let pool = self.relational_pool().await?;
        let request = QueryRequest {
            text: text.to_string(),
            params: params.to_vec(),
        };
        executor::fetch(&pool, &request).await
    }

    /// Execute a write statement (DML/DDL) against the active relational
    /// backend. Migration runners consume this as their opaque entry point.
    pub async fn execute(&self, text: &str, params: &[QueryParam]) -> StoreResult<ExecuteResult> {
        let pool = self.relational_pool().await?;
        let request = QueryRequest {
            text: text.to_string(),
            params: params.to_vec(),
        };
        executor::execute(&pool, &request).await
    }

    /// Run a unit of work inside a transaction on the active relational
    /// backend. See [`TransactionCoordinator::run`] for the commit and
    /// rollback contract.
    pub async fn transaction<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: for<'t> FnOnce(&'t mut TxHandle) -> BoxFuture<'t, StoreResult<T>>,
    {
        let pool = self.relational_pool().await?;
        TransactionCoordinator::run(&pool, work).await
    }

    /// The document store client, for collaborators that work with
    /// collections directly.
    pub async fn document_store(&self) -> StoreResult<Arc<DocumentStore>> {
        let kind = self.document_descriptor.kind;
        let slot = self.document.read().await;
        if !slot.state.status.is_available() {
            return Err(StoreError::unavailable(
                kind.as_str(),
                slot.state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("status is {}", slot.state.status)),
            ));
        }
        slot.store
            .clone()
            .ok_or_else(|| StoreError::unavailable(kind.as_str(), "no live client"))
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe every backend and return a structured report. Never fails:
    /// a fully-down deployment still gets a report, so status endpoints
    /// stay available through an outage.
    ///
    /// A probe that finds a backend unreachable also advances that
    /// backend's state machine, and a backend that lands in `unreachable`
    /// gets a reconnection attempt spawned through the initializer path
    /// (at most one in flight per backend).
    pub async fn health_check(self: &Arc<Self>) -> HealthReport {
        let record = self.probe_all().await;

        let relational_kind = self.relational_descriptor.kind;
        if let Some(outcome) = record.backends.get(&relational_kind) {
            self.apply_relational_probe(outcome).await;
        }
        if let Some(outcome) = record.backends.get(&BackendKind::Document) {
            self.apply_document_probe(outcome).await;
        }

        let status = derive_overall(record.backends.values().map(|o| o.status));

        HealthReport {
            status,
            database: relational_kind,
            timestamp: record.timestamp,
            pool_status: self.pool_status().await,
            backends: record.backends,
        }
    }

    /// Probe both backends concurrently, without touching the state machine.
    pub async fn probe_all(&self) -> HealthRecord {
        let (relational, document) =
            tokio::join!(self.probe_relational_backend(), self.probe_document_backend());

        let mut backends = BTreeMap::new();
        backends.insert(self.relational_descriptor.kind, relational);
        backends.insert(BackendKind::Document, document);

        HealthRecord {
            timestamp: Utc::now(),
            backends,
        }
    }

    async fn probe_relational_backend(&self) -> ProbeOutcome {
        let pool = { self.relational.read().await.pool.clone() };
        match pool {
            Some(pool) => self.monitor.probe_relational(&pool).await,
            None => {
                let slot = self.relational.read().await;
                ProbeOutcome::unreachable(
                    0,
                    slot.state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "not initialized".to_string()),
                )
            }
        }
    }

    async fn probe_document_backend(&self) -> ProbeOutcome {
        let store = { self.document.read().await.store.clone() };
        match store {
            Some(store) => self.monitor.probe_document(&store).await,
            None => {
                let slot = self.document.read().await;
                ProbeOutcome::unreachable(
                    0,
                    slot.state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "not initialized".to_string()),
                )
            }
        }
    }

    async fn apply_relational_probe(self: &Arc<Self>, outcome: &ProbeOutcome) {
        let kind = self.relational_descriptor.kind;
        let (from, to) = {
            let mut slot = self.relational.write().await;
            let from = slot.state.status;
            // The initializer owns these states; probes do not interfere.
            if matches!(
                from,
                ConnectionStatus::Uninitialized | ConnectionStatus::Connecting
            ) {
                return;
            }
            let to = apply_probe(&mut slot.state, outcome, self.options.probe_failure_budget);
            (from, to)
        };
        self.emit(kind, from, to);

        if to == ConnectionStatus::Unreachable {
            self.spawn_relational_reconnect();
        }
    }

    async fn apply_document_probe(self: &Arc<Self>, outcome: &ProbeOutcome) {
        let kind = self.document_descriptor.kind;
        let (from, to) = {
            let mut slot = self.document.write().await;
            let from = slot.state.status;
            if matches!(
                from,
                ConnectionStatus::Uninitialized | ConnectionStatus::Connecting
            ) {
                return;
            }
            let to = apply_probe(&mut slot.state, outcome, self.options.probe_failure_budget);
            (from, to)
        };
        self.emit(kind, from, to);

        if to == ConnectionStatus::Unreachable {
            self.spawn_document_reconnect();
        }
    }

    /// Kick off a background reconnect unless one is already in flight.
    fn spawn_relational_reconnect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.relational_reconnect.try_lock() {
                Ok(_guard) => {
                    info!(
                        backend = %manager.relational_descriptor.kind,
                        "Attempting reconnection"
                    );
                    manager.establish_relational().await;
                }
                Err(_) => {
                    debug!(
                        backend = %manager.relational_descriptor.kind,
                        "Reconnect already in flight, skipping"
                    );
                }
            }
        });
    }

    fn spawn_document_reconnect(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.document_reconnect.try_lock() {
                Ok(_guard) => {
                    info!(
                        backend = %manager.document_descriptor.kind,
                        "Attempting reconnection"
                    );
                    manager.establish_document().await;
                }
                Err(_) => {
                    debug!(
                        backend = %manager.document_descriptor.kind,
                        "Reconnect already in flight, skipping"
                    );
                }
            }
        });
    }

    /// Live pool counters per backend with a live handle.
    pub async fn pool_status(&self) -> BTreeMap<BackendKind, PoolStatus> {
        let mut map = BTreeMap::new();
        if let Some(pool) = self.relational.read().await.pool.clone() {
            map.insert(self.relational_descriptor.kind, pool.status());
        }
        if let Some(store) = self.document.read().await.store.clone() {
            map.insert(BackendKind::Document, store.pool_status());
        }
        map
    }

    /// Current lifecycle status of one backend.
    pub async fn backend_status(&self, kind: BackendKind) -> ConnectionStatus {
        if kind == BackendKind::Document {
            self.document.read().await.state.status
        } else if kind == self.relational_descriptor.kind {
            self.relational.read().await.state.status
        } else {
            ConnectionStatus::Uninitialized
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Release every handle in reverse order of acquisition (document
    /// client first, then the relational pool). The drivers' close paths
    /// do not surface errors; a slow backend delays only its own close.
    /// After this the manager can be initialized again.
    pub async fn shutdown(&self) {
        info!("Shutting down data stores");

        let store = {
            let mut slot = self.document.write().await;
            slot.state.attempt_count = 0;
            slot.state.last_error = None;
            slot.store.take()
        };
        if let Some(store) = store {
            store.shutdown().await;
        }
        self.set_document_status(ConnectionStatus::Uninitialized, None).await;

        let pool = {
            let mut slot = self.relational.write().await;
            slot.state.attempt_count = 0;
            slot.state.last_error = None;
            slot.pool.take()
        };
        if let Some(pool) = pool {
            pool.close().await;
        }
        self.set_relational_status(ConnectionStatus::Uninitialized, None).await;

        info!("All data stores shut down");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("relational", &self.relational_descriptor.kind)
            .field("document", &self.document_descriptor.kind)
            .finish()
    }
}

/// Advance one backend's state for a probe outcome. Returns the new status.
fn apply_probe(
    state: &mut ConnectionState,
    outcome: &ProbeOutcome,
    failure_budget: u32,
) -> ConnectionStatus {
    match outcome.status {
        ProbeStatus::Healthy => {
            state.status = ConnectionStatus::Connected;
            state.attempt_count = 0;
            state.last_error = None;
        }
        ProbeStatus::Degraded => {
            state.status = ConnectionStatus::Degraded;
            state.last_error = outcome.message.clone();
        }
        ProbeStatus::Unreachable => {
            state.attempt_count += 1;
            state.last_error = outcome.message.clone();
            state.status = match state.status {
                ConnectionStatus::Connected => ConnectionStatus::Degraded,
                ConnectionStatus::Degraded if state.attempt_count >= failure_budget => {
                    ConnectionStatus::Unreachable
                }
                other => other,
            };
        }
    }
    state.status
}

/// Overall health is derived from, and always reported next to, the
/// per-backend picture; a partial outage shows as degraded, never hidden.
fn derive_overall<I: IntoIterator<Item = ProbeStatus>>(statuses: I) -> OverallStatus {
    let statuses: Vec<ProbeStatus> = statuses.into_iter().collect();
    if statuses.iter().all(|s| *s == ProbeStatus::Healthy) {
        OverallStatus::Healthy
    } else if statuses.iter().any(|s| s.is_up()) {
        OverallStatus::Degraded
    } else {
        OverallStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: ConnectionStatus, attempts: u32) -> ConnectionState {
        ConnectionState {
            status,
            attempt_count: attempts,
            last_error: None,
        }
    }

    #[test]
    fn test_healthy_probe_resets_state() {
        let mut s = state(ConnectionStatus::Degraded, 2);
        s.last_error = Some("slow".to_string());
        let to = apply_probe(&mut s, &ProbeOutcome::healthy(5), 3);
        assert_eq!(to, ConnectionStatus::Connected);
        assert_eq!(s.attempt_count, 0);
        assert!(s.last_error.is_none());
    }

    #[test]
    fn test_healthy_probe_recovers_unreachable() {
        let mut s = state(ConnectionStatus::Unreachable, 7);
        let to = apply_probe(&mut s, &ProbeOutcome::healthy(5), 3);
        assert_eq!(to, ConnectionStatus::Connected);
        assert_eq!(s.attempt_count, 0);
    }

    #[test]
    fn test_failed_probe_from_connected_degrades() {
        let mut s = state(ConnectionStatus::Connected, 0);
        let to = apply_probe(&mut s, &ProbeOutcome::unreachable(0, "refused"), 3);
        assert_eq!(to, ConnectionStatus::Degraded);
        assert_eq!(s.attempt_count, 1);
        assert_eq!(s.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_degraded_within_budget_stays_degraded() {
        let mut s = state(ConnectionStatus::Degraded, 1);
        let to = apply_probe(&mut s, &ProbeOutcome::unreachable(0, "refused"), 3);
        assert_eq!(to, ConnectionStatus::Degraded);
        assert_eq!(s.attempt_count, 2);
    }

    #[test]
    fn test_degraded_beyond_budget_becomes_unreachable() {
        let mut s = state(ConnectionStatus::Degraded, 2);
        let to = apply_probe(&mut s, &ProbeOutcome::unreachable(0, "refused"), 3);
        assert_eq!(to, ConnectionStatus::Unreachable);
        assert_eq!(s.attempt_count, 3);
    }

    #[test]
    fn test_slow_probe_marks_degraded_without_counting_failure() {
        let mut s = state(ConnectionStatus::Connected, 0);
        let to = apply_probe(&mut s, &ProbeOutcome::degraded(900, "slow"), 3);
        assert_eq!(to, ConnectionStatus::Degraded);
        assert_eq!(s.attempt_count, 0);
    }

    #[test]
    fn test_derive_overall() {
        use ProbeStatus::*;
        assert_eq!(derive_overall([Healthy, Healthy]), OverallStatus::Healthy);
        assert_eq!(
            derive_overall([Healthy, Unreachable]),
            OverallStatus::Degraded
        );
        assert_eq!(derive_overall([Degraded, Healthy]), OverallStatus::Degraded);
        assert_eq!(
            derive_overall([Unreachable, Unreachable]),
            OverallStatus::Unhealthy
        );
    }
}
