//! Error types for the data-store layer.
//!
//! All failures surface as [`StoreError`], defined with `thiserror`. The
//! taxonomy follows the contract boundaries: configuration problems are
//! fatal at startup for a single backend, pool timeouts are retryable by
//! the caller, query and transaction failures surface immediately, and
//! probe failures never escape the health monitor at all.

use thiserror::Error;

/// Classification of a query failure, decided before or after the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Parameter count does not match placeholder count. Detected locally,
    /// before any network call.
    ParamMismatch,
    /// The backend rejected the statement as malformed.
    Syntax,
    /// A constraint (unique, foreign key, not-null, check) was violated.
    Constraint,
    /// Any other execution failure reported by the backend.
    Execution,
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ParamMismatch => "param-mismatch",
            Self::Syntax => "syntax",
            Self::Constraint => "constraint",
            Self::Execution => "execution",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unresolvable or malformed configuration. Fatal at startup for the
    /// named backend only; other backends keep initializing.
    #[error("Configuration error for {backend}: {message}")]
    Config { backend: String, message: String },

    /// Transport-level failure: refused connection, dropped socket, TLS.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// Pool acquire exceeded the configured timeout. Retryable by the caller.
    #[error("Pool acquire timed out after {elapsed_ms}ms")]
    PoolTimeout { elapsed_ms: u64 },

    /// The backend (or local validation) rejected a query.
    #[error("Query failed ({kind}): {message}")]
    Query {
        kind: QueryErrorKind,
        message: String,
        /// e.g. "42601" for a syntax error on the primary engine
        sql_state: Option<String>,
    },

    /// A statement exceeded its execution timeout.
    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    StatementTimeout { operation: String, elapsed_ms: u64 },

    /// Commit itself failed after the unit of work succeeded.
    #[error("Transaction commit failed: {source}")]
    CommitFailed {
        #[source]
        source: Box<StoreError>,
    },

    /// Rollback failed after the unit of work had already failed. Both
    /// errors are carried; `original` is what the caller's closure raised.
    #[error("Transaction rollback failed: {rollback} (original error: {original})")]
    RollbackFailed {
        original: Box<StoreError>,
        rollback: Box<StoreError>,
    },

    /// The requested backend has no live handle (not initialized, or shut down).
    #[error("Backend {backend} is unavailable: {message}")]
    Unavailable { backend: String, message: String },
}

impl StoreError {
    /// Create a configuration error scoped to one backend.
    pub fn config(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a transport-level connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a pool acquire timeout error.
    pub fn pool_timeout(elapsed_ms: u64) -> Self {
        Self::PoolTimeout { elapsed_ms }
    }

    /// Create a query error with an optional SQL state code.
    pub fn query(
        kind: QueryErrorKind,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Query {
            kind,
            message: message.into(),
            sql_state,
        }
    }

    /// Create a parameter-count mismatch error.
    pub fn param_mismatch(placeholders: usize, params: usize) -> Self {
        Self::Query {
            kind: QueryErrorKind::ParamMismatch,
            message: format!(
                "statement has {} placeholder(s) but {} parameter(s) were supplied",
                placeholders, params
            ),
            sql_state: None,
        }
    }

    /// Create a statement timeout error.
    pub fn statement_timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::StatementTimeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an unavailable-backend error.
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::PoolTimeout { .. } | Self::StatementTimeout { .. }
        )
    }

    /// The SQL state code reported by the backend, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Classify a backend-reported SQLSTATE into a query error kind.
///
/// Class 42 covers syntax errors and access-rule violations on both
/// relational engines; class 23 covers integrity constraint violations.
fn classify_sql_state(code: Option<&str>) -> QueryErrorKind {
    match code {
        Some(c) if c.starts_with("42") => QueryErrorKind::Syntax,
        Some(c) if c.starts_with("23") => QueryErrorKind::Constraint,
        _ => QueryErrorKind::Execution,
    }
}

/// Convert sqlx errors into the store taxonomy.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => StoreError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let kind = classify_sql_state(code.as_deref());
                StoreError::query(kind, db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => StoreError::pool_timeout(0),
            sqlx::Error::PoolClosed => StoreError::connection("connection pool is closed"),
            sqlx::Error::Io(io_err) => StoreError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => StoreError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => {
                StoreError::connection(format!("protocol error: {}", msg))
            }
            sqlx::Error::RowNotFound => {
                StoreError::query(QueryErrorKind::Execution, "no rows returned", None)
            }
            sqlx::Error::ColumnNotFound(col) => StoreError::query(
                QueryErrorKind::Execution,
                format!("column not found: {}", col),
                None,
            ),
            sqlx::Error::ColumnDecode { index, source } => StoreError::query(
                QueryErrorKind::Execution,
                format!("failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => StoreError::query(
                QueryErrorKind::Execution,
                format!("decode error: {}", source),
                None,
            ),
            sqlx::Error::WorkerCrashed => StoreError::connection("database worker crashed"),
            other => StoreError::query(
                QueryErrorKind::Execution,
                format!("database error: {}", other),
                None,
            ),
        }
    }
}

/// Convert document-driver errors into the store taxonomy. The document
/// store has no SQL surface, so everything maps to a connection failure.
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::connection(format!("document store error: {}", err))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::connection("refused");
        assert!(err.to_string().contains("Connection failed"));

        let err = StoreError::pool_timeout(2000);
        assert!(err.to_string().contains("2000ms"));
    }

    #[test]
    fn test_param_mismatch_message() {
        let err = StoreError::param_mismatch(3, 1);
        assert!(matches!(
            err,
            StoreError::Query {
                kind: QueryErrorKind::ParamMismatch,
                ..
            }
        ));
        assert!(err.to_string().contains("3 placeholder"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(StoreError::pool_timeout(2000).is_retryable());
        assert!(StoreError::connection("refused").is_retryable());
        assert!(!StoreError::param_mismatch(1, 2).is_retryable());
        assert!(!StoreError::config("document", "bad url").is_retryable());
    }

    #[test]
    fn test_classify_sql_state() {
        assert_eq!(classify_sql_state(Some("42601")), QueryErrorKind::Syntax);
        assert_eq!(
            classify_sql_state(Some("23505")),
            QueryErrorKind::Constraint
        );
        assert_eq!(classify_sql_state(Some("08006")), QueryErrorKind::Execution);
        assert_eq!(classify_sql_state(None), QueryErrorKind::Execution);
    }

    #[test]
    fn test_rollback_failed_carries_both() {
        let original = StoreError::query(QueryErrorKind::Constraint, "duplicate key", None);
        let rollback = StoreError::connection("socket closed");
        let err = StoreError::RollbackFailed {
            original: Box::new(original),
            rollback: Box::new(rollback),
        };
        let text = err.to_string();
        assert!(text.contains("duplicate key"));
        assert!(text.contains("socket closed"));
    }

    #[test]
    fn test_pool_timed_out_maps_to_pool_timeout() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::PoolTimeout { .. }));
    }
}
