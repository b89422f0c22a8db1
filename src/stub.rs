//! Server capability traits and the session/transaction vocabulary.
//!
//! A [`ServerStub`] is bound to one server address and performs single
//! administrative or session/transaction RPCs, translating failures into the
//! typed error taxonomy. It never retries; all retry and rerouting policy
//! lives in the failover engine. A [`Connector`] produces stubs on demand so
//! the client can connect lazily and tests can substitute a mock cluster.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::topology::ReplicaSet;

/// The kind of session to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// Data read/write session.
    Data,
    /// Schema manipulation session.
    Schema,
}

/// The kind of transaction to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    /// Read-only transaction.
    Read,
    /// Read-write transaction.
    Write,
}

/// Options applied when opening a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Opt into serving reads from any replica instead of the primary.
    ///
    /// Read transactions on such a session tolerate stale data in exchange
    /// for throughput and availability.
    pub read_any_replica: bool,
}

/// Options applied when opening a transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Server-side transaction timeout override.
    pub transaction_timeout: Option<Duration>,
}

/// Opaque token for a server-side session, bound to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Server-assigned session identifier.
    pub id: String,
    /// Address of the server the session was opened against.
    pub address: String,
}

/// Opaque token for a server-side transaction, bound to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    /// Server-assigned transaction identifier.
    pub id: String,
    /// Address of the server the transaction was opened against.
    pub address: String,
}

/// A capability object bound to one server address.
///
/// Implementations perform exactly one remote call per method and classify
/// failures per the error taxonomy: `NotPrimary` when the server's typed
/// response says it no longer holds the primary replica, `Unreachable` for
/// transport-level failures ([`SdkError::from_status`] and
/// [`SdkError::from_transport`] provide the classification), and `Rpc` for
/// everything else. Stubs never retry.
///
/// [`SdkError::from_status`]: crate::SdkError::from_status
/// [`SdkError::from_transport`]: crate::SdkError::from_transport
#[async_trait]
pub trait ServerStub: Send + Sync + fmt::Debug {
    /// Returns the address this stub is bound to.
    fn address(&self) -> &str;

    /// Fetches this server's view of the replica topology for `database`.
    async fn replica_topology(&self, database: &str) -> Result<ReplicaSet>;

    /// Opens a session against this server.
    async fn open_session(
        &self,
        database: &str,
        session_type: SessionType,
        options: &SessionOptions,
    ) -> Result<SessionHandle>;

    /// Closes a session previously opened against this server.
    async fn close_session(&self, session: &SessionHandle) -> Result<()>;

    /// Opens a transaction within a session on this server.
    async fn open_transaction(
        &self,
        session: &SessionHandle,
        transaction_type: TransactionType,
        options: &TransactionOptions,
    ) -> Result<TransactionHandle>;

    /// Creates a database.
    async fn create_database(&self, name: &str) -> Result<()>;

    /// Deletes a database.
    async fn delete_database(&self, name: &str) -> Result<()>;

    /// Returns whether a database exists.
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Lists all databases known to this server.
    async fn all_databases(&self) -> Result<Vec<String>>;
}

/// Produces a [`ServerStub`] for a server address.
///
/// Invoked lazily by the client the first time an address is contacted; the
/// resulting stub is cached for the life of the client. A connection failure
/// is classified as `Unreachable` so discovery can advance to the next
/// candidate.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to `address` and returns a stub bound to it.
    async fn connect(&self, address: &str) -> Result<Arc<dyn ServerStub>>;
}
