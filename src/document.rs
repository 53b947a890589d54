//! Document store client.
//!
//! Wraps the official MongoDB driver behind the same descriptor-driven
//! lifecycle the relational pool uses: connect with explicit timeouts,
//! verify reachability eagerly, probe with a ping, shut down cleanly. The
//! driver owns its connection pooling internally; this layer configures
//! the bounds and reports them in `pool_status()`.

use crate::error::{StoreError, StoreResult};
use crate::models::{BackendDescriptor, BackendKind, PoolStatus};
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client;
use tracing::{debug, info, warn};

/// Live client for the document backend.
pub struct DocumentStore {
    client: Client,
    database: String,
    min_connections: u32,
    max_connections: u32,
}

impl DocumentStore {
    /// Connect to the document store described by `descriptor`.
    ///
    /// The driver connects lazily, so an explicit ping runs before this
    /// returns; an unreachable host fails here, inside the descriptor's
    /// connect timeout, rather than on first use.
    pub async fn connect(descriptor: &BackendDescriptor) -> StoreResult<Self> {
        debug_assert_eq!(descriptor.kind, BackendKind::Document);
        let url = descriptor.connection_url()?;
        let params = &descriptor.params;

        let mut options = ClientOptions::parse(&url).await.map_err(|e| {
            StoreError::config(
                descriptor.kind.as_str(),
                format!("invalid connection URL: {}", e),
            )
        })?;
        options.min_pool_size = Some(params.min_connections);
        options.max_pool_size = Some(params.max_connections);
        options.connect_timeout = Some(params.acquire_timeout());
        options.server_selection_timeout = Some(params.acquire_timeout());
        options.max_idle_time = Some(params.idle_timeout());

        let client = Client::with_options(options).map_err(StoreError::from)?;

        let store = Self {
            client,
            database: params.database.clone(),
            min_connections: params.min_connections,
            max_connections: params.max_connections,
        };
        store.ping().await?;

        info!(
            backend = %descriptor.kind,
            url = %descriptor.masked_url(),
            "Document store connected"
        );

        Ok(store)
    }

    /// The underlying driver client, for collaborators that work with
    /// collections directly. Lifecycle stays owned by this layer.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Handle to the configured database.
    pub fn database(&self) -> mongodb::Database {
        self.client.database(&self.database)
    }

    /// Minimal round trip used by connect verification and health probes.
    pub async fn ping(&self) -> StoreResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Best-effort server version from buildInfo.
    pub async fn server_version(&self) -> Option<String> {
        match self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
        {
            Ok(info) => {
                let version = info.get_str("version").ok().map(String::from);
                debug!(version = ?version, "Got document server version");
                version
            }
            Err(e) => {
                warn!(error = %e, "Failed to get document server version");
                None
            }
        }
    }

    /// Configured pool bounds. The driver does not expose live counters,
    /// so those report zero.
    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            total_count: 0,
            idle_count: 0,
            waiting_count: 0,
            max_connections: self.max_connections,
            min_connections: self.min_connections,
        }
    }

    /// Shut down the client, closing its pooled sockets.
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
        info!("Document store shut down");
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
