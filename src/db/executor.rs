//! Query execution engine.
//!
//! The entry points take a logical [`QueryRequest`], translate it through
//! the adapter for the pool's placeholder style, acquire a connection, and
//! run it with the descriptor's statement timeout. Engine-specific
//! implementations live in the `postgres` and `mysql` submodules; the code
//! structure is intentionally parallel to make differences obvious.

use crate::db::adapter;
use crate::db::pool::{ConnectionHandle, RelationalPool};
use crate::db::types::RowToJson;
use crate::error::{StoreError, StoreResult};
use crate::models::{ExecuteResult, QueryParam, QueryRequest, QueryResult};
use std::time::{Duration, Instant};
use tracing::debug;

/// Execute a read query and return the uniform result shape.
pub async fn fetch(pool: &RelationalPool, request: &QueryRequest) -> StoreResult<QueryResult> {
    let start = Instant::now();
    let translated = adapter::translate(request, pool.placeholder_style())?;
    let stmt_timeout = pool.statement_timeout();

    debug!(
        backend = %pool.kind(),
        sql = %translated.text,
        params = request.params.len(),
        "Executing query"
    );

    let mut handle = pool.acquire().await?;
    let result = fetch_on(&mut handle, &translated.text, &request.params, stmt_timeout).await;
    RelationalPool::release(handle);

    let (fields, rows) = result?;
    Ok(adapter::normalize(
        fields,
        rows,
        start.elapsed().as_millis() as u64,
    ))
}

/// Execute a write operation (INSERT/UPDATE/DELETE/DDL) and return the
/// affected row count.
pub async fn execute(pool: &RelationalPool, request: &QueryRequest) -> StoreResult<ExecuteResult> {
    let start = Instant::now();
    let translated = adapter::translate(request, pool.placeholder_style())?;
    let stmt_timeout = pool.statement_timeout();

    debug!(
        backend = %pool.kind(),
        sql = %translated.text,
        params = request.params.len(),
        "Executing write operation"
    );

    let mut handle = pool.acquire().await?;
    let result = execute_on(&mut handle, &translated.text, &request.params, stmt_timeout).await;
    RelationalPool::release(handle);

    Ok(ExecuteResult {
        rows_affected: result?,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a translated read query on an already-acquired handle.
pub(crate) async fn fetch_on(
    handle: &mut ConnectionHandle,
    sql: &str,
    params: &[QueryParam],
    stmt_timeout: Duration,
) -> StoreResult<DecodedRows> {
    match handle {
        ConnectionHandle::Postgres(conn) => {
            let rows = postgres::fetch_rows(&mut *conn, sql, params, stmt_timeout).await?;
            Ok(decode_rows(rows))
        }
        ConnectionHandle::MySql(conn) => {
            let rows = mysql::fetch_rows(&mut *conn, sql, params, stmt_timeout).await?;
            Ok(decode_rows(rows))
        }
    }
}

/// Run a translated write on an already-acquired handle.
pub(crate) async fn execute_on(
    handle: &mut ConnectionHandle,
    sql: &str,
    params: &[QueryParam],
    stmt_timeout: Duration,
) -> StoreResult<u64> {
    match handle {
        ConnectionHandle::Postgres(conn) => {
            postgres::execute_write(&mut *conn, sql, params, stmt_timeout).await
        }
        ConnectionHandle::MySql(conn) => {
            mysql::execute_write(&mut *conn, sql, params, stmt_timeout).await
        }
    }
}

/// Column metadata plus JSON rows, ready for `adapter::normalize`.
pub(crate) type DecodedRows = (
    Vec<crate::models::ColumnMetadata>,
    Vec<serde_json::Map<String, serde_json::Value>>,
);

/// Decode engine rows into the uniform JSON row shape.
pub(crate) fn decode_rows<R: RowToJson>(rows: Vec<R>) -> DecodedRows {
    let fields = rows
        .first()
        .map(|r| r.column_metadata())
        .unwrap_or_default();
    let json_rows = rows.iter().map(|r| r.to_json_map()).collect();
    (fields, json_rows)
}

fn timeout_error(operation: &str, timeout: Duration) -> StoreError {
    StoreError::statement_timeout(operation, timeout.as_millis() as u64)
}

// =============================================================================
// Engine-Specific Implementations
// =============================================================================

pub(crate) mod postgres {
    use super::*;
    use sqlx::PgConnection;
    use sqlx::postgres::{PgArguments, PgRow};
    use tokio::time::timeout;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        stmt_timeout: Duration,
    ) -> StoreResult<Vec<PgRow>> {
        // When params is empty, run the raw SQL to avoid prepared statement
        // issues with multi-statement or DDL text.
        let rows_future = async {
            if params.is_empty() {
                use sqlx::Executor;
                (&mut *conn).fetch_all(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_param(query, param);
                }
                query.fetch_all(&mut *conn).await
            }
        };

        match timeout(stmt_timeout, rows_future).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(timeout_error("query execution", stmt_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        stmt_timeout: Duration,
    ) -> StoreResult<u64> {
        let result_future = async {
            if params.is_empty() {
                use sqlx::Executor;
                (&mut *conn).execute(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_param(query, param);
                }
                query.execute(&mut *conn).await
            }
        };

        match timeout(stmt_timeout, result_future).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(StoreError::from(e)),
            Err(_) => Err(timeout_error("write operation", stmt_timeout)),
        }
    }

    pub fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            QueryParam::Json(v) => query.bind(sqlx::types::Json(v)),
        }
    }
}

pub(crate) mod mysql {
    use super::*;
    use sqlx::MySqlConnection;
    use sqlx::mysql::{MySqlArguments, MySqlRow};
    use tokio::time::timeout;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        stmt_timeout: Duration,
    ) -> StoreResult<Vec<MySqlRow>> {
        let rows_future = async {
            if params.is_empty() {
                use sqlx::Executor;
                (&mut *conn).fetch_all(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_param(query, param);
                }
                query.fetch_all(&mut *conn).await
            }
        };

        match timeout(stmt_timeout, rows_future).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(timeout_error("query execution", stmt_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        stmt_timeout: Duration,
    ) -> StoreResult<u64> {
        let result_future = async {
            if params.is_empty() {
                use sqlx::Executor;
                (&mut *conn).execute(sql).await
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_param(query, param);
                }
                query.execute(&mut *conn).await
            }
        };

        match timeout(stmt_timeout, result_future).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(StoreError::from(e)),
            Err(_) => Err(timeout_error("write operation", stmt_timeout)),
        }
    }

    pub fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            QueryParam::Json(v) => query.bind(sqlx::types::Json(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMetadata;

    struct FakeRow;

    impl RowToJson for FakeRow {
        fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
            let mut map = serde_json::Map::new();
            map.insert("test".to_string(), serde_json::json!(1));
            map
        }

        fn column_metadata(&self) -> Vec<ColumnMetadata> {
            vec![ColumnMetadata::new("test", "INT4")]
        }
    }

    #[test]
    fn test_decode_rows_takes_fields_from_first_row() {
        let (fields, rows) = decode_rows(vec![FakeRow, FakeRow]);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "test");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["test"], serde_json::json!(1));
    }

    #[test]
    fn test_decode_rows_empty() {
        let (fields, rows) = decode_rows(Vec::<FakeRow>::new());
        assert!(fields.is_empty());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_timeout_error_carries_budget() {
        let err = timeout_error("query execution", Duration::from_millis(1500));
        assert!(matches!(err, StoreError::StatementTimeout { elapsed_ms: 1500, .. }));
    }
}
