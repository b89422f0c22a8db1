//! Main `ClusterClient` implementation.
//!
//! Owns the pieces the failover engine works over: the seed configuration,
//! the lazily populated stub cache, and the routing table. Cheap to clone;
//! all clones share the same underlying state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ClientConfig;
use crate::database::DatabaseManager;
use crate::error::Result;
use crate::failover::{Attempt, run_any_replica, run_primary_replica};
use crate::session::ClusterSession;
use crate::stub::{Connector, ServerStub, SessionOptions, SessionType};
use crate::topology::{ReplicaInfo, RoutingTable};

/// Client for a TrellisDB cluster.
///
/// Routes sessions, transactions, and administrative calls to the correct
/// replica, transparently rerouting when the primary moves or a node
/// becomes unreachable.
///
/// # Example
///
/// ```ignore
/// use trellisdb_sdk::{ClientConfig, ClusterClient, SessionOptions, SessionType};
///
/// let config = ClientConfig::builder()
///     .with_seed_addresses(["10.0.0.1:1729", "10.0.0.2:1729"])
///     .build()?;
/// let client = ClusterClient::new(config, connector);
///
/// let session = client
///     .session("orders", SessionType::Data, SessionOptions::default())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct ClusterClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    stubs: RwLock<HashMap<String, Arc<dyn ServerStub>>>,
    routing: RoutingTable,
}

impl ClusterClient {
    /// Creates a cluster client over the given configuration and connector.
    ///
    /// No connection is established yet; stubs are created lazily the first
    /// time each address is contacted.
    #[must_use]
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                stubs: RwLock::new(HashMap::new()),
                routing: RoutingTable::new(),
            }),
        }
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the configured seed addresses, in bootstrap order.
    #[must_use]
    pub fn seed_addresses(&self) -> &[String] {
        self.inner.config.seed_addresses()
    }

    /// Returns the routing table shared by all clones of this client.
    ///
    /// Exposed so tests can seed topology deterministically and callers can
    /// inspect the current routing belief.
    #[must_use]
    pub fn routing_table(&self) -> &RoutingTable {
        &self.inner.routing
    }

    /// Returns the stub for `address`, connecting on first use.
    ///
    /// Stubs are cached per address for the life of the client. Losing a
    /// concurrent connect race keeps the winner's stub.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` when the connector cannot reach the address.
    pub async fn stub(&self, address: &str) -> Result<Arc<dyn ServerStub>> {
        if let Some(stub) = self.inner.stubs.read().get(address) {
            return Ok(Arc::clone(stub));
        }

        let stub = self.inner.connector.connect(address).await?;

        let mut stubs = self.inner.stubs.write();
        let entry = stubs.entry(address.to_owned()).or_insert(stub);
        Ok(Arc::clone(entry))
    }

    /// Opens a session on `database`.
    ///
    /// The session opens against the current primary replica unless
    /// [`SessionOptions::read_any_replica`] is set, in which case the
    /// preferred replica is tried first and unreachable replicas are
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnavailable` when no suitable replica could serve
    /// the open, or the first non-retryable server error.
    pub async fn session(
        &self,
        database: &str,
        session_type: SessionType,
        options: SessionOptions,
    ) -> Result<ClusterSession> {
        let open = |replica: ReplicaInfo, _attempt: Attempt| {
            let client = self.clone();
            let database = database.to_owned();
            let options = options.clone();
            async move {
                let stub = client.stub(&replica.address).await?;
                stub.open_session(&database, session_type, &options).await
            }
        };

        let handle = if options.read_any_replica {
            run_any_replica(self, database, open).await?
        } else {
            run_primary_replica(self, database, open).await?
        };

        Ok(ClusterSession::bound(self.clone(), database, session_type, options, handle))
    }

    /// Returns the administrative database manager.
    #[must_use]
    pub fn databases(&self) -> DatabaseManager {
        DatabaseManager::new(self.clone())
    }
}
