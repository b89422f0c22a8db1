//! Cluster sessions and transactions with reroute-aware rebinding.
//!
//! A [`ClusterSession`] is bound to one server at a time. A transaction
//! cannot be moved between server connections, so when the failover engine
//! reroutes a transaction open, the session must first release its stale
//! server-side state, re-open against the new replica, and rebind — only
//! then is the transaction opened. The binding is an explicit state machine
//! ([`BindingState`]) whose transitions are driven solely by the engine's
//! retry loop; the session has no autonomous retry behavior.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::{Result, SdkError};
use crate::failover::{Attempt, run_any_replica, run_primary_replica};
use crate::stub::{
    SessionHandle, SessionOptions, SessionType, TransactionHandle, TransactionOptions,
    TransactionType,
};
use crate::topology::ReplicaInfo;

/// Where a session currently stands in its failover lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// No server-side session exists yet.
    Unbound,
    /// A server-side session is open on the named server.
    Bound(String),
    /// The stale binding has been released; a replacement is being opened.
    Rebinding,
    /// The session was closed; no further operations are accepted.
    Closed,
}

#[derive(Debug)]
struct Binding {
    state: BindingState,
    handle: Option<SessionHandle>,
}

#[derive(Debug)]
struct SessionInner {
    client: ClusterClient,
    database: String,
    session_type: SessionType,
    options: SessionOptions,
    binding: RwLock<Binding>,
}

/// A session on a TrellisDB cluster, bound to one server at a time.
///
/// Cheap to clone; all clones share the same binding.
#[derive(Debug, Clone)]
pub struct ClusterSession {
    inner: Arc<SessionInner>,
}

impl ClusterSession {
    /// Creates a session already bound to the server that opened `handle`.
    pub(crate) fn bound(
        client: ClusterClient,
        database: &str,
        session_type: SessionType,
        options: SessionOptions,
        handle: SessionHandle,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                database: database.to_owned(),
                session_type,
                options,
                binding: RwLock::new(Binding {
                    state: BindingState::Bound(handle.address.clone()),
                    handle: Some(handle),
                }),
            }),
        }
    }

    /// Returns the database this session operates on.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// Returns the session type.
    #[must_use]
    pub fn session_type(&self) -> SessionType {
        self.inner.session_type
    }

    /// Returns the options the session was opened with.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Returns the current binding state.
    #[must_use]
    pub fn binding_state(&self) -> BindingState {
        self.inner.binding.read().state.clone()
    }

    /// Returns the address of the server this session is currently bound
    /// to, if any.
    #[must_use]
    pub fn bound_address(&self) -> Option<String> {
        match &self.inner.binding.read().state {
            BindingState::Bound(address) => Some(address.clone()),
            _ => None,
        }
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.inner.binding.read().state, BindingState::Closed)
    }

    /// Opens a transaction in this session.
    ///
    /// Routed to the primary replica unless the session was opened with
    /// [`SessionOptions::read_any_replica`] and the transaction is
    /// [`TransactionType::Read`]. The first attempt targets the session's
    /// currently bound server; a reroute releases the stale session,
    /// re-opens against the new replica, rebinds, and only then opens the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session was closed,
    /// `ClusterUnavailable` when no replica could serve the open, or the
    /// first non-retryable server error.
    pub async fn transaction(
        &self,
        transaction_type: TransactionType,
        options: TransactionOptions,
    ) -> Result<ClusterTransaction> {
        if !self.is_open() {
            return Err(SdkError::SessionClosed);
        }

        let open = |replica: ReplicaInfo, attempt: Attempt| {
            let session = self.clone();
            let options = options.clone();
            async move {
                if attempt == Attempt::Reroute {
                    session.release_stale_binding().await?;
                }
                let handle = session.ensure_bound(&replica).await?;
                let stub = session.inner.client.stub(&handle.address).await?;
                let transaction =
                    stub.open_transaction(&handle, transaction_type, &options).await?;
                Ok(ClusterTransaction::new(session.clone(), transaction_type, transaction))
            }
        };

        let any_replica =
            self.inner.options.read_any_replica && transaction_type == TransactionType::Read;

        if any_replica {
            run_any_replica(&self.inner.client, &self.inner.database, open).await
        } else {
            run_primary_replica(&self.inner.client, &self.inner.database, open).await
        }
    }

    /// Closes the session, releasing its server-side state.
    ///
    /// Closing an already-closed session is a no-op. The server-side
    /// release is best-effort: a failure to reach the (possibly dead)
    /// server is logged and swallowed, and the session still transitions
    /// to [`BindingState::Closed`].
    pub async fn close(&self) {
        let stale = {
            let mut binding = self.inner.binding.write();
            if matches!(binding.state, BindingState::Closed) {
                return;
            }
            binding.state = BindingState::Closed;
            binding.handle.take()
        };

        if let Some(handle) = stale {
            self.release_on_server(&handle).await;
        }
    }

    /// Returns the current session handle, opening a server-side session
    /// against `replica` if none is bound.
    async fn ensure_bound(&self, replica: &ReplicaInfo) -> Result<SessionHandle> {
        {
            let binding = self.inner.binding.read();
            if matches!(binding.state, BindingState::Closed) {
                return Err(SdkError::SessionClosed);
            }
            if let Some(handle) = &binding.handle {
                return Ok(handle.clone());
            }
        }

        let stub = self.inner.client.stub(&replica.address).await?;
        let handle = stub
            .open_session(&self.inner.database, self.inner.session_type, &self.inner.options)
            .await?;

        {
            let mut binding = self.inner.binding.write();
            if matches!(binding.state, BindingState::Closed) {
                // Closed while the replacement open was in flight.
                drop(binding);
                self.release_on_server(&handle).await;
                return Err(SdkError::SessionClosed);
            }
            binding.state = BindingState::Bound(handle.address.clone());
            binding.handle = Some(handle.clone());
        }

        debug!(
            database = %self.inner.database,
            address = %handle.address,
            "session bound"
        );
        Ok(handle)
    }

    /// Releases the stale server-side session before a reroute.
    ///
    /// The old server is typically the one that just failed, so a failed
    /// close must not mask the reroute: close errors are logged and
    /// swallowed.
    async fn release_stale_binding(&self) -> Result<()> {
        let stale = {
            let mut binding = self.inner.binding.write();
            if matches!(binding.state, BindingState::Closed) {
                return Err(SdkError::SessionClosed);
            }
            binding.state = BindingState::Rebinding;
            binding.handle.take()
        };

        if let Some(handle) = stale {
            debug!(
                database = %self.inner.database,
                address = %handle.address,
                "releasing stale session before reroute"
            );
            self.release_on_server(&handle).await;
        }

        Ok(())
    }

    /// Best-effort close of a server-side session.
    async fn release_on_server(&self, handle: &SessionHandle) {
        match self.inner.client.stub(&handle.address).await {
            Ok(stub) => {
                if let Err(err) = stub.close_session(handle).await {
                    debug!(address = %handle.address, error = %err, "failed to close session");
                }
            }
            Err(err) => {
                debug!(address = %handle.address, error = %err, "server unreachable for session close");
            }
        }
    }
}

/// A transaction opened through a [`ClusterSession`].
///
/// Records the server it was opened against; the transaction is pinned to
/// that server's connection for its lifetime.
#[derive(Debug, Clone)]
pub struct ClusterTransaction {
    session: ClusterSession,
    transaction_type: TransactionType,
    handle: TransactionHandle,
}

impl ClusterTransaction {
    fn new(
        session: ClusterSession,
        transaction_type: TransactionType,
        handle: TransactionHandle,
    ) -> Self {
        Self { session, transaction_type, handle }
    }

    /// Returns the session this transaction belongs to.
    #[must_use]
    pub fn session(&self) -> &ClusterSession {
        &self.session
    }

    /// Returns the transaction type.
    #[must_use]
    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    /// Returns the server-assigned transaction identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// Returns the address of the server the transaction was opened
    /// against.
    #[must_use]
    pub fn server_address(&self) -> &str {
        &self.handle.address
    }
}
