//! Mock cluster for failover testing.
//!
//! Provides a controllable in-process implementation of [`ServerStub`] and
//! [`Connector`] for testing routing, retry, and rerouting behavior without
//! a real cluster.
//!
//! # Features
//!
//! - **Shared topology**: every node answers topology fetches from one
//!   cluster-wide view, settable per database
//! - **Failure injection**: mark nodes unreachable, make them reject opens
//!   with not-primary for the next N requests, or fail the next request
//!   with an arbitrary gRPC status
//! - **Request counting**: per-node counters for topology fetches, session
//!   and transaction opens, closes, and admin calls
//! - **Event log**: cluster-wide ordered log of successful operations, for
//!   asserting call ordering (e.g. stale session closed before rebind)
//!
//! # Example
//!
//! ```no_run
//! use trellisdb_sdk::mock::MockCluster;
//! use trellisdb_sdk::{ClientConfig, ClusterClient, SessionOptions, SessionType};
//!
//! # async fn example() -> trellisdb_sdk::Result<()> {
//! let cluster = MockCluster::new(&["10.0.0.1:1729", "10.0.0.2:1729"]);
//! cluster.set_topology(
//!     "orders",
//!     &[("10.0.0.1:1729", true, true), ("10.0.0.2:1729", false, false)],
//! );
//!
//! let config = ClientConfig::builder()
//!     .with_seed_addresses(["10.0.0.1:1729", "10.0.0.2:1729"])
//!     .build()?;
//! let client = ClusterClient::new(config, cluster.connector());
//!
//! let session = client
//!     .session("orders", SessionType::Data, SessionOptions::default())
//!     .await?;
//! assert_eq!(session.bound_address().as_deref(), Some("10.0.0.1:1729"));
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::Code;

use crate::error::{NotPrimarySnafu, Result, RpcSnafu, SdkError, UnreachableSnafu};
use crate::stub::{
    Connector, ServerStub, SessionHandle, SessionOptions, SessionType, TransactionHandle,
    TransactionOptions, TransactionType,
};
use crate::topology::{ReplicaInfo, ReplicaSet};

/// A successful operation recorded in the cluster-wide event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A node answered a topology fetch.
    TopologyFetch {
        /// Node that answered.
        address: String,
        /// Database fetched.
        database: String,
    },
    /// A session was opened on a node.
    SessionOpened {
        /// Node the session was opened on.
        address: String,
        /// Session identifier.
        session: String,
    },
    /// A session was closed on a node.
    SessionClosed {
        /// Node the session was closed on.
        address: String,
        /// Session identifier.
        session: String,
    },
    /// A transaction was opened on a node.
    TransactionOpened {
        /// Node the transaction was opened on.
        address: String,
        /// Parent session identifier.
        session: String,
    },
}

/// State shared by every node of a [`MockCluster`].
#[derive(Debug, Default)]
struct SharedState {
    /// Cluster-wide topology view: database -> replicas.
    topologies: RwLock<HashMap<String, Vec<ReplicaInfo>>>,

    /// Databases known to the cluster.
    databases: RwLock<HashSet<String>>,

    /// Ordered log of successful operations across all nodes.
    events: RwLock<Vec<MockEvent>>,

    /// Source for session/transaction identifiers.
    next_id: AtomicU64,
}

/// An in-process mock cluster.
#[derive(Debug)]
pub struct MockCluster {
    shared: Arc<SharedState>,
    nodes: HashMap<String, Arc<MockNode>>,
    connector: Arc<MockConnector>,
}

impl MockCluster {
    /// Creates a cluster with one node per address.
    #[must_use]
    pub fn new(addresses: &[&str]) -> Self {
        let shared = Arc::new(SharedState::default());

        let nodes: HashMap<String, Arc<MockNode>> = addresses
            .iter()
            .map(|address| {
                ((*address).to_owned(), Arc::new(MockNode::new(address, Arc::clone(&shared))))
            })
            .collect();

        let connector = Arc::new(MockConnector::new(nodes.clone()));

        Self { shared, nodes, connector }
    }

    /// Sets the cluster-wide topology for `database`.
    ///
    /// Each replica is given as `(address, is_primary, is_preferred)`. The
    /// database is also registered as existing.
    pub fn set_topology(&self, database: &str, replicas: &[(&str, bool, bool)]) {
        let replicas: Vec<ReplicaInfo> = replicas
            .iter()
            .map(|(address, is_primary, is_preferred)| {
                ReplicaInfo::new(*address, *is_primary, *is_preferred)
            })
            .collect();

        self.shared.topologies.write().insert(database.to_owned(), replicas);
        self.shared.databases.write().insert(database.to_owned());
    }

    /// Returns the node bound to `address`.
    ///
    /// # Panics
    ///
    /// Panics if the address was not part of the cluster.
    #[must_use]
    pub fn node(&self, address: &str) -> Arc<MockNode> {
        Arc::clone(self.nodes.get(address).unwrap_or_else(|| panic!("unknown node {address}")))
    }

    /// Returns a connector that resolves this cluster's nodes.
    ///
    /// Connecting to an address outside the cluster fails `Unreachable`.
    /// Nodes flagged unreachable still connect; their RPCs fail, which is
    /// where the flag is observed.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Returns how many connect calls the connector served.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connector.connects.load(Ordering::SeqCst)
    }

    /// Returns a copy of the cluster-wide event log.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.read().clone()
    }

    /// Clears the cluster-wide event log.
    pub fn clear_events(&self) {
        self.shared.events.write().clear();
    }
}

/// One node of a [`MockCluster`].
///
/// Counters record *attempts*: they are incremented at call entry, before
/// injected failures are applied. The event log records successes only.
#[derive(Debug)]
pub struct MockNode {
    address: String,
    shared: Arc<SharedState>,

    /// When set, every RPC on this node fails `Unreachable`.
    unreachable: AtomicBool,

    /// Number of upcoming session/transaction opens to reject not-primary.
    not_primary_responses: AtomicUsize,

    /// One-shot gRPC status injected into the next RPC.
    fail_next: RwLock<Option<(Code, String)>>,

    /// Sessions currently open on this node.
    open_sessions: RwLock<HashSet<String>>,

    topology_requests: AtomicUsize,
    session_opens: AtomicUsize,
    transaction_opens: AtomicUsize,
    session_closes: AtomicUsize,
    admin_requests: AtomicUsize,
}

impl MockNode {
    fn new(address: &str, shared: Arc<SharedState>) -> Self {
        Self {
            address: address.to_owned(),
            shared,
            unreachable: AtomicBool::new(false),
            not_primary_responses: AtomicUsize::new(0),
            fail_next: RwLock::new(None),
            open_sessions: RwLock::new(HashSet::new()),
            topology_requests: AtomicUsize::new(0),
            session_opens: AtomicUsize::new(0),
            transaction_opens: AtomicUsize::new(0),
            session_closes: AtomicUsize::new(0),
            admin_requests: AtomicUsize::new(0),
        }
    }

    /// Marks the node unreachable (or reachable again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes the next `count` session/transaction opens fail not-primary.
    ///
    /// Use `usize::MAX` for a node that never accepts opens.
    pub fn set_not_primary_responses(&self, count: usize) {
        self.not_primary_responses.store(count, Ordering::SeqCst);
    }

    /// Injects a one-shot gRPC status into the next RPC on this node.
    pub fn fail_next_with(&self, code: Code, message: &str) {
        *self.fail_next.write() = Some((code, message.to_owned()));
    }

    /// Returns how many topology fetches this node received.
    #[must_use]
    pub fn topology_requests(&self) -> usize {
        self.topology_requests.load(Ordering::SeqCst)
    }

    /// Returns how many session opens this node received.
    #[must_use]
    pub fn session_opens(&self) -> usize {
        self.session_opens.load(Ordering::SeqCst)
    }

    /// Returns how many transaction opens this node received.
    #[must_use]
    pub fn transaction_opens(&self) -> usize {
        self.transaction_opens.load(Ordering::SeqCst)
    }

    /// Returns how many session closes this node received.
    #[must_use]
    pub fn session_closes(&self) -> usize {
        self.session_closes.load(Ordering::SeqCst)
    }

    /// Returns how many administrative calls this node received.
    #[must_use]
    pub fn admin_requests(&self) -> usize {
        self.admin_requests.load(Ordering::SeqCst)
    }

    /// Returns whether a session is currently open on this node.
    #[must_use]
    pub fn has_open_session(&self, session_id: &str) -> bool {
        self.open_sessions.read().contains(session_id)
    }

    /// Applies the unreachable flag and any injected one-shot status.
    fn gate(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return UnreachableSnafu {
                address: self.address.clone(),
                message: "connection refused",
            }
            .fail();
        }

        if let Some((code, message)) = self.fail_next.write().take() {
            return Err(SdkError::from_status(&self.address, tonic::Status::new(code, message)));
        }

        Ok(())
    }

    /// Consumes one pending not-primary rejection, if any.
    fn should_reject_not_primary(&self) -> bool {
        loop {
            let current = self.not_primary_responses.load(Ordering::SeqCst);
            if current == 0 {
                return false;
            }
            // usize::MAX means "always"; do not count it down.
            if current == usize::MAX {
                return true;
            }
            if self
                .not_primary_responses
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{id}")
    }

    fn record(&self, event: MockEvent) {
        self.shared.events.write().push(event);
    }
}

#[async_trait]
impl ServerStub for MockNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn replica_topology(&self, database: &str) -> Result<ReplicaSet> {
        self.topology_requests.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let topologies = self.shared.topologies.read();
        let replicas = topologies.get(database).ok_or_else(|| {
            RpcSnafu { code: Code::NotFound, message: format!("unknown database '{database}'") }
                .build()
        })?;

        self.record(MockEvent::TopologyFetch {
            address: self.address.clone(),
            database: database.to_owned(),
        });
        Ok(ReplicaSet::new(database, replicas.clone()))
    }

    async fn open_session(
        &self,
        database: &str,
        _session_type: SessionType,
        _options: &SessionOptions,
    ) -> Result<SessionHandle> {
        self.session_opens.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        if self.should_reject_not_primary() {
            return NotPrimarySnafu { address: self.address.clone() }.fail();
        }

        if !self.shared.databases.read().contains(database) {
            return RpcSnafu {
                code: Code::NotFound,
                message: format!("unknown database '{database}'"),
            }
            .fail();
        }

        let id = self.next_id("s");
        self.open_sessions.write().insert(id.clone());
        self.record(MockEvent::SessionOpened {
            address: self.address.clone(),
            session: id.clone(),
        });

        Ok(SessionHandle { id, address: self.address.clone() })
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<()> {
        self.session_closes.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        self.open_sessions.write().remove(&session.id);
        self.record(MockEvent::SessionClosed {
            address: self.address.clone(),
            session: session.id.clone(),
        });
        Ok(())
    }

    async fn open_transaction(
        &self,
        session: &SessionHandle,
        _transaction_type: TransactionType,
        _options: &TransactionOptions,
    ) -> Result<TransactionHandle> {
        self.transaction_opens.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        if self.should_reject_not_primary() {
            return NotPrimarySnafu { address: self.address.clone() }.fail();
        }

        if !self.open_sessions.read().contains(&session.id) {
            return RpcSnafu {
                code: Code::FailedPrecondition,
                message: format!("unknown session '{}'", session.id),
            }
            .fail();
        }

        let id = self.next_id("t");
        self.record(MockEvent::TransactionOpened {
            address: self.address.clone(),
            session: session.id.clone(),
        });

        Ok(TransactionHandle { id, address: self.address.clone() })
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.admin_requests.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        if !self.shared.databases.write().insert(name.to_owned()) {
            return RpcSnafu {
                code: Code::AlreadyExists,
                message: format!("database '{name}' already exists"),
            }
            .fail();
        }
        Ok(())
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        self.admin_requests.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        if !self.shared.databases.write().remove(name) {
            return RpcSnafu {
                code: Code::NotFound,
                message: format!("unknown database '{name}'"),
            }
            .fail();
        }
        self.shared.topologies.write().remove(name);
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        self.admin_requests.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        Ok(self.shared.databases.read().contains(name))
    }

    async fn all_databases(&self) -> Result<Vec<String>> {
        self.admin_requests.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let mut names: Vec<String> = self.shared.databases.read().iter().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Connector resolving addresses to the nodes of a [`MockCluster`].
#[derive(Debug)]
pub struct MockConnector {
    nodes: HashMap<String, Arc<MockNode>>,
    connects: AtomicUsize,
}

impl MockConnector {
    fn new(nodes: HashMap<String, Arc<MockNode>>) -> Self {
        Self { nodes, connects: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ServerStub>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        match self.nodes.get(address) {
            Some(node) => {
                let stub: Arc<dyn ServerStub> = node.clone();
                Ok(stub)
            }
            None => {
                UnreachableSnafu { address: address.to_owned(), message: "no route to host" }
                    .fail()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn topology_fetch_answers_shared_view() {
        let cluster = MockCluster::new(&["10.0.0.1:1729", "10.0.0.2:1729"]);
        cluster.set_topology(
            "orders",
            &[("10.0.0.1:1729", true, true), ("10.0.0.2:1729", false, false)],
        );

        let node = cluster.node("10.0.0.2:1729");
        let set = node.replica_topology("orders").await.expect("topology");

        assert_eq!(set.database(), "orders");
        assert_eq!(set.primary().expect("primary").address, "10.0.0.1:1729");
        assert_eq!(node.topology_requests(), 1);
    }

    #[tokio::test]
    async fn unreachable_node_fails_every_rpc_but_counts_attempts() {
        let cluster = MockCluster::new(&["10.0.0.1:1729"]);
        cluster.set_topology("orders", &[("10.0.0.1:1729", true, true)]);

        let node = cluster.node("10.0.0.1:1729");
        node.set_unreachable(true);

        let err = node.replica_topology("orders").await.expect_err("unreachable");
        assert!(err.is_unreachable());
        assert_eq!(node.topology_requests(), 1);
    }

    #[tokio::test]
    async fn not_primary_injection_counts_down() {
        let cluster = MockCluster::new(&["10.0.0.1:1729"]);
        cluster.set_topology("orders", &[("10.0.0.1:1729", true, true)]);

        let node = cluster.node("10.0.0.1:1729");
        node.set_not_primary_responses(1);

        let options = SessionOptions::default();
        let err = node
            .open_session("orders", SessionType::Data, &options)
            .await
            .expect_err("rejected");
        assert!(err.is_not_primary());

        // Injection consumed; the next open succeeds.
        let handle =
            node.open_session("orders", SessionType::Data, &options).await.expect("accepted");
        assert!(node.has_open_session(&handle.id));
        assert_eq!(node.session_opens(), 2);
    }

    #[tokio::test]
    async fn fail_next_with_is_one_shot() {
        let cluster = MockCluster::new(&["10.0.0.1:1729"]);
        cluster.set_topology("orders", &[("10.0.0.1:1729", true, true)]);

        let node = cluster.node("10.0.0.1:1729");
        node.fail_next_with(Code::PermissionDenied, "access denied");

        let err = node.replica_topology("orders").await.expect_err("injected");
        assert_eq!(err.code(), Some(Code::PermissionDenied));

        node.replica_topology("orders").await.expect("recovered");
    }

    #[tokio::test]
    async fn connector_rejects_unknown_address() {
        let cluster = MockCluster::new(&["10.0.0.1:1729"]);
        let connector = cluster.connector();

        let err = connector.connect("10.9.9.9:1729").await.expect_err("unknown");
        assert!(err.is_unreachable());
        assert_eq!(cluster.connect_count(), 1);
    }

    #[tokio::test]
    async fn transaction_requires_open_session() {
        let cluster = MockCluster::new(&["10.0.0.1:1729"]);
        cluster.set_topology("orders", &[("10.0.0.1:1729", true, true)]);

        let node = cluster.node("10.0.0.1:1729");
        let stale = SessionHandle { id: "s-999".to_owned(), address: "10.0.0.1:1729".to_owned() };

        let err = node
            .open_transaction(&stale, TransactionType::Read, &TransactionOptions::default())
            .await
            .expect_err("unknown session");
        assert_eq!(err.code(), Some(Code::FailedPrecondition));
    }
}
