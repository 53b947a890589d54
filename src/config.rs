//! Configuration resolution for the store layer.
//!
//! [`ConfigResolver`] turns a layered set of environment overrides into
//! complete [`BackendDescriptor`]s. The environment is snapshotted once at
//! construction and never re-read, so a process cannot observe a mid-run
//! reconfiguration. Resolution per field is fixed, most specific wins:
//!
//! 1. explicit connection URL (`POSTGRES_URL` / `MYSQL_URL` / `MONGO_URL`,
//!    or `DATABASE_URL` for the active relational engine)
//! 2. backend-specific variables (`POSTGRES_HOST`, `MYSQL_PORT`, ...)
//! 3. generic fallback variables (`DB_HOST`, `DB_PORT`, ...)
//! 4. hard defaults
//!
//! `resolve()` never fails: missing or unparseable values fall through to
//! the next layer. A malformed URL override is the one thing deferred to
//! the initializer, which reports it as a `Config` error for that backend.

use crate::models::{BackendDescriptor, BackendKind, ConnectionParams};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DATABASE: &str = "app";
pub const DEFAULT_POOL_MIN: u32 = 1;
pub const DEFAULT_POOL_MAX: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;

// Orchestrator defaults
pub const DEFAULT_INIT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 250;
pub const DEFAULT_PROBE_LATENCY_BUDGET_MS: u64 = 250;
pub const DEFAULT_PROBE_FAILURE_BUDGET: u32 = 3;

/// Tunables consumed by the connection manager rather than a single pool.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Bounded attempt budget per backend during initialize()/reconnect.
    pub init_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Probe round trips over this budget classify as degraded.
    pub latency_budget_ms: u64,
    /// Consecutive failed probes from degraded before unreachable.
    pub probe_failure_budget: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            init_attempts: DEFAULT_INIT_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            latency_budget_ms: DEFAULT_PROBE_LATENCY_BUDGET_MS,
            probe_failure_budget: DEFAULT_PROBE_FAILURE_BUDGET,
        }
    }
}

/// Resolves backend selection and connection parameters from an immutable
/// environment snapshot.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    env: HashMap<String, String>,
}

impl ConfigResolver {
    /// Snapshot the process environment once.
    pub fn from_env() -> Self {
        Self {
            env: std::env::vars().collect(),
        }
    }

    /// Build a resolver over explicit key/value pairs (used by tests and
    /// embedders that manage configuration themselves).
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// First value among `keys` that is present and non-empty.
    fn first_of<'a>(&'a self, keys: &[String]) -> Option<&'a str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// First value among `keys` that parses; unparseable values fall through.
    fn first_parsed<T: std::str::FromStr>(&self, keys: &[String]) -> Option<T> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find_map(|v| v.parse().ok())
    }

    fn first_bool(&self, keys: &[String]) -> Option<bool> {
        keys.iter().filter_map(|k| self.get(k)).find_map(|v| {
            if v.eq_ignore_ascii_case("true") || v == "1" {
                Some(true)
            } else if v.eq_ignore_ascii_case("false") || v == "0" {
                Some(false)
            } else {
                None
            }
        })
    }

    /// Which relational engine is active: `DB_ENGINE` = `primary`
    /// (default) or `secondary`. Engine names are accepted as aliases.
    pub fn relational_kind(&self) -> BackendKind {
        match self.get("DB_ENGINE").map(str::to_ascii_lowercase).as_deref() {
            Some("secondary") | Some("mysql") | Some("mariadb") => {
                BackendKind::RelationalSecondary
            }
            _ => BackendKind::RelationalPrimary,
        }
    }

    /// Environment prefix for backend-specific variables.
    fn prefix(kind: BackendKind) -> &'static str {
        match kind {
            BackendKind::RelationalPrimary => "POSTGRES",
            BackendKind::RelationalSecondary => "MYSQL",
            BackendKind::Document => "MONGO",
        }
    }

    /// Key chain for one field: backend-specific first, then generic.
    fn keys(kind: BackendKind, specific: &str, generic: &str) -> Vec<String> {
        vec![
            format!("{}_{}", Self::prefix(kind), specific),
            generic.to_string(),
        ]
    }

    /// Connection-URL override for a backend. `DATABASE_URL` applies to
    /// the relational engines only; the document store has its own key.
    fn url_override(&self, kind: BackendKind) -> Option<String> {
        let specific = format!("{}_URL", Self::prefix(kind));
        if let Some(url) = self.get(&specific) {
            return Some(url.to_string());
        }
        if kind.is_relational() {
            return self.get("DATABASE_URL").map(str::to_string);
        }
        None
    }

    /// Resolve a complete descriptor for one backend.
    ///
    /// Always returns a descriptor: every missing field takes its default.
    pub fn resolve(&self, kind: BackendKind) -> BackendDescriptor {
        let params = ConnectionParams {
            host: self
                .first_of(&Self::keys(kind, "HOST", "DB_HOST"))
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: self
                .first_parsed(&Self::keys(kind, "PORT", "DB_PORT"))
                .unwrap_or_else(|| kind.default_port()),
            user: self
                .first_of(&Self::keys(kind, "USER", "DB_USER"))
                .unwrap_or(kind.default_user())
                .to_string(),
            password: self
                .first_of(&Self::keys(kind, "PASSWORD", "DB_PASSWORD"))
                .unwrap_or("")
                .to_string(),
            database: self
                .first_of(&Self::keys(kind, "DATABASE", "DB_NAME"))
                .unwrap_or(DEFAULT_DATABASE)
                .to_string(),
            min_connections: self
                .first_parsed(&Self::keys(kind, "POOL_MIN", "DB_POOL_MIN"))
                .unwrap_or(DEFAULT_POOL_MIN),
            max_connections: self
                .first_parsed(&Self::keys(kind, "POOL_MAX", "DB_POOL_MAX"))
                .unwrap_or(DEFAULT_POOL_MAX),
            acquire_timeout_ms: self
                .first_parsed(&Self::keys(
                    kind,
                    "CONNECT_TIMEOUT_MS",
                    "DB_CONNECT_TIMEOUT_MS",
                ))
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            idle_timeout_ms: self
                .first_parsed(&Self::keys(kind, "IDLE_TIMEOUT_MS", "DB_IDLE_TIMEOUT_MS"))
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_MS),
            statement_timeout_ms: self
                .first_parsed(&Self::keys(
                    kind,
                    "STATEMENT_TIMEOUT_MS",
                    "DB_STATEMENT_TIMEOUT_MS",
                ))
                .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_MS),
            tls: self
                .first_bool(&Self::keys(kind, "TLS", "DB_TLS"))
                .unwrap_or(false),
            url_override: self.url_override(kind),
        };

        BackendDescriptor {
            kind,
            placeholder_style: kind.placeholder_style(),
            params,
        }
    }

    /// Orchestrator tunables from the generic namespace.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        let defaults = OrchestratorOptions::default();
        OrchestratorOptions {
            init_attempts: self
                .first_parsed(&["DB_INIT_ATTEMPTS".to_string()])
                .unwrap_or(defaults.init_attempts)
                .max(1),
            retry_delay: Duration::from_millis(
                self.first_parsed(&["DB_RETRY_DELAY_MS".to_string()])
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            latency_budget_ms: self
                .first_parsed(&["DB_PROBE_LATENCY_BUDGET_MS".to_string()])
                .unwrap_or(defaults.latency_budget_ms),
            probe_failure_budget: self
                .first_parsed(&["DB_PROBE_FAILURE_BUDGET".to_string()])
                .unwrap_or(defaults.probe_failure_budget)
                .max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaceholderStyle;

    #[test]
    fn test_defaults_when_environment_empty() {
        let resolver = ConfigResolver::from_vars(Vec::<(String, String)>::new());
        let descriptor = resolver.resolve(BackendKind::RelationalPrimary);
        assert_eq!(descriptor.params.host, "localhost");
        assert_eq!(descriptor.params.port, 5432);
        assert_eq!(descriptor.params.user, "postgres");
        assert_eq!(descriptor.params.database, "app");
        assert_eq!(descriptor.params.max_connections, DEFAULT_POOL_MAX);
        assert_eq!(descriptor.placeholder_style, PlaceholderStyle::Numbered);
        assert!(descriptor.params.url_override.is_none());
    }

    #[test]
    fn test_backend_specific_beats_generic() {
        let resolver = ConfigResolver::from_vars([
            ("DB_HOST", "generic.host"),
            ("POSTGRES_HOST", "pg.host"),
        ]);
        let pg = resolver.resolve(BackendKind::RelationalPrimary);
        assert_eq!(pg.params.host, "pg.host");

        // The secondary engine has no specific override, so the generic wins.
        let my = resolver.resolve(BackendKind::RelationalSecondary);
        assert_eq!(my.params.host, "generic.host");
    }

    #[test]
    fn test_url_override_beats_discrete_fields() {
        let resolver = ConfigResolver::from_vars([
            ("POSTGRES_URL", "postgres://u:p@elsewhere:6432/reports"),
            ("POSTGRES_HOST", "ignored.host"),
        ]);
        let descriptor = resolver.resolve(BackendKind::RelationalPrimary);
        assert_eq!(
            descriptor.params.url_override.as_deref(),
            Some("postgres://u:p@elsewhere:6432/reports")
        );
        assert_eq!(
            descriptor.connection_url().unwrap(),
            "postgres://u:p@elsewhere:6432/reports"
        );
    }

    #[test]
    fn test_database_url_applies_to_relational_only() {
        let resolver =
            ConfigResolver::from_vars([("DATABASE_URL", "postgres://u:p@host:5432/db")]);
        assert!(
            resolver
                .resolve(BackendKind::RelationalPrimary)
                .params
                .url_override
                .is_some()
        );
        assert!(
            resolver
                .resolve(BackendKind::Document)
                .params
                .url_override
                .is_none()
        );
    }

    #[test]
    fn test_relational_kind_selector() {
        let resolver = ConfigResolver::from_vars(Vec::<(String, String)>::new());
        assert_eq!(resolver.relational_kind(), BackendKind::RelationalPrimary);

        let resolver = ConfigResolver::from_vars([("DB_ENGINE", "secondary")]);
        assert_eq!(resolver.relational_kind(), BackendKind::RelationalSecondary);

        let resolver = ConfigResolver::from_vars([("DB_ENGINE", "mysql")]);
        assert_eq!(resolver.relational_kind(), BackendKind::RelationalSecondary);

        let resolver = ConfigResolver::from_vars([("DB_ENGINE", "nonsense")]);
        assert_eq!(resolver.relational_kind(), BackendKind::RelationalPrimary);
    }

    #[test]
    fn test_unparseable_numeric_falls_through() {
        let resolver = ConfigResolver::from_vars([
            ("POSTGRES_PORT", "not-a-port"),
            ("DB_PORT", "6000"),
        ]);
        let descriptor = resolver.resolve(BackendKind::RelationalPrimary);
        assert_eq!(descriptor.params.port, 6000);

        // Both layers unparseable: hard default.
        let resolver =
            ConfigResolver::from_vars([("POSTGRES_PORT", "x"), ("DB_PORT", "y")]);
        let descriptor = resolver.resolve(BackendKind::RelationalPrimary);
        assert_eq!(descriptor.params.port, 5432);
    }

    #[test]
    fn test_tls_parsing() {
        let resolver = ConfigResolver::from_vars([("DB_TLS", "true")]);
        assert!(resolver.resolve(BackendKind::RelationalPrimary).params.tls);

        let resolver = ConfigResolver::from_vars([("DB_TLS", "garbage")]);
        assert!(!resolver.resolve(BackendKind::RelationalPrimary).params.tls);

        let resolver = ConfigResolver::from_vars([("MONGO_TLS", "1"), ("DB_TLS", "false")]);
        assert!(resolver.resolve(BackendKind::Document).params.tls);
    }

    #[test]
    fn test_document_defaults() {
        let resolver = ConfigResolver::from_vars(Vec::<(String, String)>::new());
        let descriptor = resolver.resolve(BackendKind::Document);
        assert_eq!(descriptor.params.port, 27017);
        assert_eq!(descriptor.params.user, "");
        assert_eq!(
            descriptor.connection_url().unwrap(),
            "mongodb://localhost:27017"
        );
    }

    #[test]
    fn test_orchestrator_options() {
        let resolver = ConfigResolver::from_vars([
            ("DB_INIT_ATTEMPTS", "5"),
            ("DB_PROBE_LATENCY_BUDGET_MS", "100"),
        ]);
        let opts = resolver.orchestrator_options();
        assert_eq!(opts.init_attempts, 5);
        assert_eq!(opts.latency_budget_ms, 100);
        assert_eq!(opts.probe_failure_budget, DEFAULT_PROBE_FAILURE_BUDGET);

        // Zero attempt budgets are clamped up: one attempt always runs.
        let resolver = ConfigResolver::from_vars([("DB_INIT_ATTEMPTS", "0")]);
        assert_eq!(resolver.orchestrator_options().init_attempts, 1);
    }
}
