//! Transaction coordination.
//!
//! [`TransactionCoordinator::run`] wraps a unit-of-work closure in a
//! backend-native begin/commit/rollback. The underlying connection is
//! owned by the transaction value, so it returns to the pool exactly once
//! on every exit path - commit, rollback, and panic (sqlx rolls back a
//! dropped transaction) - without duplicated release calls.

use crate::db::adapter;
use crate::db::executor;
use crate::error::{StoreError, StoreResult};
use crate::models::{ExecuteResult, PlaceholderStyle, QueryParam, QueryRequest, QueryResult};
use crate::db::pool::{EnginePool, RelationalPool};
use futures_util::future::BoxFuture;
use sqlx::{MySql, Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Engine-specific transaction wrapper.
enum DbTransaction {
    Postgres(Transaction<'static, Postgres>),
    MySql(Transaction<'static, MySql>),
}

impl DbTransaction {
    async fn commit(self) -> StoreResult<()> {
        match self {
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(StoreError::from),
            DbTransaction::MySql(tx) => tx.commit().await.map_err(StoreError::from),
        }
    }

    async fn rollback(self) -> StoreResult<()> {
        match self {
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(StoreError::from),
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(StoreError::from),
        }
    }
}

/// Statement surface handed to the unit-of-work closure.
///
/// All statements issued through one handle run sequentially on the same
/// physical connection; no other caller can interleave on it.
pub struct TxHandle {
    tx: DbTransaction,
    placeholder_style: PlaceholderStyle,
    statement_timeout: Duration,
}

impl TxHandle {
    /// Execute a read query inside the transaction.
    pub async fn query(&mut self, text: &str, params: &[QueryParam]) -> StoreResult<QueryResult> {
        let start = Instant::now();
        let request = QueryRequest {
            text: text.to_string(),
            params: params.to_vec(),
        };
        let translated = adapter::translate(&request, self.placeholder_style)?;

        let (fields, rows) = match &mut self.tx {
            DbTransaction::Postgres(tx) => {
                let rows = executor::postgres::fetch_rows(
                    &mut *tx,
                    &translated.text,
                    params,
                    self.statement_timeout,
                )
                .await?;
                executor::decode_rows(rows)
            }
            DbTransaction::MySql(tx) => {
                let rows = executor::mysql::fetch_rows(
                    &mut *tx,
                    &translated.text,
                    params,
                    self.statement_timeout,
                )
                .await?;
                executor::decode_rows(rows)
            }
        };

        Ok(adapter::normalize(
            fields,
            rows,
            start.elapsed().as_millis() as u64,
        ))
    }

    /// Execute a write statement inside the transaction.
    pub async fn execute(
        &mut self,
        text: &str,
        params: &[QueryParam],
    ) -> StoreResult<ExecuteResult> {
        let start = Instant::now();
        let request = QueryRequest {
            text: text.to_string(),
            params: params.to_vec(),
        };
        let translated = adapter::translate(&request, self.placeholder_style)?;

        let rows_affected = match &mut self.tx {
            DbTransaction::Postgres(tx) => {
                executor::postgres::execute_write(
                    &mut *tx,
                    &translated.text,
                    params,
                    self.statement_timeout,
                )
                .await?
            }
            DbTransaction::MySql(tx) => {
                executor::mysql::execute_write(
                    &mut *tx,
                    &translated.text,
                    params,
                    self.statement_timeout,
                )
                .await?
            }
        };

        Ok(ExecuteResult {
            rows_affected,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Runs closures as transactions against the active relational pool.
pub struct TransactionCoordinator;

impl TransactionCoordinator {
    /// Run `work` inside a transaction.
    ///
    /// On success, commits; a commit failure surfaces as `CommitFailed`.
    /// On error from `work`, rolls back and re-raises the original error
    /// untouched; if rollback itself fails, both errors surface together
    /// as `RollbackFailed`.
    pub async fn run<T, F>(pool: &RelationalPool, work: F) -> StoreResult<T>
    where
        F: for<'t> FnOnce(&'t mut TxHandle) -> BoxFuture<'t, StoreResult<T>>,
    {
        let tx = Self::begin(pool).await?;
        let mut handle = TxHandle {
            tx,
            placeholder_style: pool.placeholder_style(),
            statement_timeout: pool.statement_timeout(),
        };

        debug!(backend = %pool.kind(), "Transaction started");

        match work(&mut handle).await {
            Ok(value) => match handle.tx.commit().await {
                Ok(()) => {
                    debug!(backend = %pool.kind(), "Transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    error!(backend = %pool.kind(), error = %e, "Transaction commit failed");
                    Err(StoreError::CommitFailed {
                        source: Box::new(e),
                    })
                }
            },
            Err(original) => {
                warn!(
                    backend = %pool.kind(),
                    error = %original,
                    "Transaction failed, rolling back"
                );
                match handle.tx.rollback().await {
                    Ok(()) => Err(original),
                    Err(rollback) => {
                        error!(
                            backend = %pool.kind(),
                            error = %rollback,
                            "Rollback failed"
                        );
                        Err(StoreError::RollbackFailed {
                            original: Box::new(original),
                            rollback: Box::new(rollback),
                        })
                    }
                }
            }
        }
    }

    /// Begin a transaction in the engine's idiom, acquiring one connection
    /// from the pool.
    async fn begin(pool: &RelationalPool) -> StoreResult<DbTransaction> {
        match pool.engine() {
            EnginePool::Postgres(p) => match p.begin().await {
                Ok(tx) => Ok(DbTransaction::Postgres(tx)),
                Err(sqlx::Error::PoolTimedOut) => {
                    Err(StoreError::pool_timeout(pool.acquire_timeout_ms()))
                }
                Err(e) => Err(StoreError::from(e)),
            },
            EnginePool::MySql(p) => match p.begin().await {
                Ok(tx) => Ok(DbTransaction::MySql(tx)),
                Err(sqlx::Error::PoolTimedOut) => {
                    Err(StoreError::pool_timeout(pool.acquire_timeout_ms()))
                }
                Err(e) => Err(StoreError::from(e)),
            },
        }
    }
}
