//! Relational connection pooling.
//!
//! [`RelationalPool`] wraps the engine-specific sqlx pools (PgPool,
//! MySqlPool) behind one acquire/release surface. Engine-specific pools are
//! used rather than the `Any` driver to keep full type support.
//!
//! Release semantics are ownership-based: a [`ConnectionHandle`] returns
//! its slot to the pool exactly once, when dropped. Double release is
//! unrepresentable, which keeps the pool-size invariant
//! `idle + in_use == total` intact by construction.

use crate::error::{StoreError, StoreResult};
use crate::models::{BackendDescriptor, BackendKind, PlaceholderStyle, PoolStatus};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySql, MySqlPool, PgPool, Postgres, pool::PoolConnection};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Engine-specific connection pool.
#[derive(Debug, Clone)]
pub enum EnginePool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// One acquired connection, exclusively owned until dropped.
pub enum ConnectionHandle {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = match self {
            Self::Postgres(_) => "postgres",
            Self::MySql(_) => "mysql",
        };
        f.debug_struct("ConnectionHandle")
            .field("engine", &engine)
            .finish()
    }
}

/// Pool over one relational backend, built from its descriptor.
pub struct RelationalPool {
    pool: EnginePool,
    kind: BackendKind,
    placeholder_style: PlaceholderStyle,
    min_connections: u32,
    max_connections: u32,
    acquire_timeout_ms: u64,
    statement_timeout: Duration,
    /// Callers currently blocked in acquire().
    waiting: AtomicU32,
}

impl RelationalPool {
    /// Establish a pool for the descriptor's engine.
    ///
    /// Connects eagerly: at least one connection is established before this
    /// returns, so an unreachable backend fails here rather than on first use.
    pub async fn connect(descriptor: &BackendDescriptor) -> StoreResult<Self> {
        let url = descriptor.connection_url()?;
        let params = &descriptor.params;

        let pool = match descriptor.kind {
            BackendKind::RelationalPrimary => {
                let pool = PgPoolOptions::new()
                    .min_connections(params.min_connections)
                    .max_connections(params.max_connections)
                    .acquire_timeout(params.acquire_timeout())
                    .idle_timeout(Some(params.idle_timeout()))
                    .connect(&url)
                    .await
                    .map_err(StoreError::from)?;
                EnginePool::Postgres(pool)
            }
            BackendKind::RelationalSecondary => {
                let options = MySqlConnectOptions::from_str(&url)
                    .map_err(|e| {
                        StoreError::config(
                            descriptor.kind.as_str(),
                            format!("invalid connection URL: {}", e),
                        )
                    })?
                    .charset("utf8mb4");

                let pool = MySqlPoolOptions::new()
                    .min_connections(params.min_connections)
                    .max_connections(params.max_connections)
                    .acquire_timeout(params.acquire_timeout())
                    .idle_timeout(Some(params.idle_timeout()))
                    .connect_with(options)
                    .await
                    .map_err(StoreError::from)?;
                EnginePool::MySql(pool)
            }
            BackendKind::Document => {
                return Err(StoreError::config(
                    descriptor.kind.as_str(),
                    "document store does not use the relational pool",
                ));
            }
        };

        debug!(backend = %descriptor.kind, url = %descriptor.masked_url(), "Pool established");

        Ok(Self {
            pool,
            kind: descriptor.kind,
            placeholder_style: descriptor.placeholder_style,
            min_connections: params.min_connections,
            max_connections: params.max_connections,
            acquire_timeout_ms: params.acquire_timeout_ms,
            statement_timeout: params.statement_timeout(),
            waiting: AtomicU32::new(0),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.placeholder_style
    }

    /// Per-statement execution budget carried from the descriptor.
    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Acquire budget carried from the descriptor.
    pub fn acquire_timeout_ms(&self) -> u64 {
        self.acquire_timeout_ms
    }

    pub fn engine(&self) -> &EnginePool {
        &self.pool
    }

    /// Acquire one connection, waiting FIFO up to the configured acquire
    /// timeout. Fails with `PoolTimeout` once the timeout elapses; the
    /// waiting counter is restored on every exit path, including
    /// cancellation.
    pub async fn acquire(&self) -> StoreResult<ConnectionHandle> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let _wait = WaitGuard(&self.waiting);

        match &self.pool {
            EnginePool::Postgres(pool) => match pool.acquire().await {
                Ok(conn) => Ok(ConnectionHandle::Postgres(conn)),
                Err(e) => Err(self.map_acquire_error(e)),
            },
            EnginePool::MySql(pool) => match pool.acquire().await {
                Ok(conn) => Ok(ConnectionHandle::MySql(conn)),
                Err(e) => Err(self.map_acquire_error(e)),
            },
        }
    }

    /// Return a handle to the pool.
    ///
    /// Releasing is just dropping; this exists to make the release point
    /// explicit at call sites. A handle cannot be released twice.
    pub fn release(handle: ConnectionHandle) {
        drop(handle);
    }

    fn map_acquire_error(&self, err: sqlx::Error) -> StoreError {
        match err {
            sqlx::Error::PoolTimedOut => {
                warn!(
                    backend = %self.kind,
                    timeout_ms = self.acquire_timeout_ms,
                    "Pool acquire timed out"
                );
                StoreError::pool_timeout(self.acquire_timeout_ms)
            }
            other => StoreError::from(other),
        }
    }

    /// Live pool counters plus the configured bounds.
    pub fn status(&self) -> PoolStatus {
        let (total, idle) = match &self.pool {
            EnginePool::Postgres(pool) => (pool.size(), pool.num_idle() as u32),
            EnginePool::MySql(pool) => (pool.size(), pool.num_idle() as u32),
        };
        PoolStatus {
            total_count: total,
            idle_count: idle,
            waiting_count: self.waiting.load(Ordering::Acquire),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
        }
    }

    /// Best-effort server version, logged at connect time and surfaced in
    /// health reports.
    pub async fn server_version(&self) -> Option<String> {
        let result = match &self.pool {
            EnginePool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await
            }
            EnginePool::MySql(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await
            }
        };
        match result {
            Ok(version) => {
                debug!(backend = %self.kind, version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(backend = %self.kind, error = %e, "Failed to get server version");
                None
            }
        }
    }

    /// Close the pool, draining idle connections and waiting for in-use
    /// connections to be returned.
    pub async fn close(&self) {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.close().await,
            EnginePool::MySql(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.is_closed(),
            EnginePool::MySql(pool) => pool.is_closed(),
        }
    }
}

impl std::fmt::Debug for RelationalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalPool")
            .field("kind", &self.kind)
            .field("max_connections", &self.max_connections)
            .field("waiting", &self.waiting.load(Ordering::Relaxed))
            .finish()
    }
}

/// Restores the waiting counter when an acquire attempt exits.
struct WaitGuard<'a>(&'a AtomicU32);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        // Saturate at 0; an underflow would mean an unpaired decrement.
        let result = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        if let Ok(0) = result {
            warn!("Pool waiting counter underflow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionParams, PlaceholderStyle};

    fn descriptor(kind: BackendKind) -> BackendDescriptor {
        BackendDescriptor {
            kind,
            placeholder_style: kind.placeholder_style(),
            params: ConnectionParams {
                host: "localhost".to_string(),
                port: kind.default_port(),
                user: kind.default_user().to_string(),
                password: String::new(),
                database: "app".to_string(),
                min_connections: 1,
                max_connections: 4,
                acquire_timeout_ms: 200,
                idle_timeout_ms: 600_000,
                statement_timeout_ms: 5_000,
                tls: false,
                url_override: None,
            },
        }
    }

    #[tokio::test]
    async fn test_document_kind_rejected() {
        let result = RelationalPool::connect(&descriptor(BackendKind::Document)).await;
        assert!(matches!(result, Err(StoreError::Config { .. })));
    }

    #[tokio::test]
    async fn test_lazy_pool_status_counters() {
        // connect_lazy performs no I/O, which is enough to exercise the
        // counter plumbing without a live server.
        let pool = RelationalPool {
            pool: EnginePool::Postgres(
                sqlx::Pool::connect_lazy("postgres://localhost/app").unwrap(),
            ),
            kind: BackendKind::RelationalPrimary,
            placeholder_style: PlaceholderStyle::Numbered,
            min_connections: 1,
            max_connections: 4,
            acquire_timeout_ms: 200,
            statement_timeout: Duration::from_secs(5),
            waiting: AtomicU32::new(0),
        };

        let status = pool.status();
        assert_eq!(status.total_count, 0);
        assert_eq!(status.idle_count, 0);
        assert_eq!(status.waiting_count, 0);
        assert_eq!(status.max_connections, 4);
        assert_eq!(status.min_connections, 1);
    }

    #[test]
    fn test_wait_guard_restores_counter() {
        let counter = AtomicU32::new(0);
        counter.fetch_add(1, Ordering::AcqRel);
        {
            let _guard = WaitGuard(&counter);
        }
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
