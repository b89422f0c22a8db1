//! Administrative database operations routed through the cluster.
//!
//! Creation, existence, and listing must work before any topology for the
//! database exists, so they walk the seed addresses and take the first
//! reachable server's answer. Deletion targets the database's primary
//! replica and evicts the routing-table entry on success.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::client::ClusterClient;
use crate::error::{ClusterUnavailableSnafu, Result};
use crate::failover::run_primary_replica;
use crate::stub::ServerStub;

/// Administrative manager for the databases of a cluster.
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    client: ClusterClient,
}

impl DatabaseManager {
    pub(crate) fn new(client: ClusterClient) -> Self {
        Self { client }
    }

    /// Creates a database.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnavailable` when no seed answers, or the server's
    /// error (e.g. the database already exists).
    pub async fn create(&self, name: &str) -> Result<()> {
        let name = name.to_owned();
        self.on_first_reachable(move |stub| {
            let name = name.clone();
            async move { stub.create_database(&name).await }
        })
        .await
    }

    /// Returns whether a database exists.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnavailable` when no seed answers.
    pub async fn contains(&self, name: &str) -> Result<bool> {
        let name = name.to_owned();
        self.on_first_reachable(move |stub| {
            let name = name.clone();
            async move { stub.database_exists(&name).await }
        })
        .await
    }

    /// Lists all databases in the cluster.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnavailable` when no seed answers.
    pub async fn all(&self) -> Result<Vec<String>> {
        self.on_first_reachable(|stub| async move { stub.all_databases().await }).await
    }

    /// Deletes a database on its primary replica.
    ///
    /// The routing-table entry for the database is evicted on success.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUnavailable` when the primary cannot be reached
    /// within the retry ceiling, or the server's error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        run_primary_replica(&self.client, name, |replica, _attempt| {
            let client = self.client.clone();
            let name = name.to_owned();
            async move {
                let stub = client.stub(&replica.address).await?;
                stub.delete_database(&name).await
            }
        })
        .await?;

        self.client.routing_table().remove(name);
        Ok(())
    }

    /// Runs `operation` against the first seed that serves it.
    ///
    /// One pass over the seeds in configured order; unreachable or
    /// non-primary seeds advance the scan, any other error propagates
    /// immediately.
    async fn on_first_reachable<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(Arc<dyn ServerStub>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for seed in self.client.seed_addresses() {
            let stub = match self.client.stub(seed).await {
                Ok(stub) => stub,
                Err(err) if err.is_replica_failover() => {
                    debug!(address = %seed, error = %err, "seed not connectable for admin call");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match operation(stub).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_replica_failover() => {
                    debug!(address = %seed, error = %err, "seed could not serve admin call");
                }
                Err(err) => return Err(err),
            }
        }

        ClusterUnavailableSnafu { attempted: self.client.seed_addresses().to_vec() }.fail()
    }
}
