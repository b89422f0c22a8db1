//! Rust client driver for TrellisDB clusters.
//!
//! TrellisDB replicates each database across a set of servers, one of which
//! holds the primary replica at any moment. This crate discovers which
//! server that is, routes sessions and transactions to it, and transparently
//! retries and reroutes when the routing belief is stale, the primary has
//! moved, or a node is unreachable.
//!
//! # Features
//!
//! - **Primary discovery**: lazy topology fetches from the configured seed
//!   servers, cached per database
//! - **Two retry strategies**: primary-replica for write-sensitive
//!   operations, any-replica for reads that opt into replica staleness
//! - **Session rebinding**: a rerouted transaction releases its stale
//!   session and re-opens it against the new replica before retrying
//! - **Typed failure taxonomy**: only staleness and reachability failures
//!   are retried; deterministic server errors surface on first occurrence
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trellisdb_sdk::{ClientConfig, ClusterClient, SessionOptions, SessionType,
//!     TransactionOptions, TransactionType};
//!
//! #[tokio::main]
//! async fn main() -> trellisdb_sdk::Result<()> {
//!     let config = ClientConfig::builder()
//!         .with_seed_addresses(["10.0.0.1:1729", "10.0.0.2:1729", "10.0.0.3:1729"])
//!         .build()?;
//!
//!     let client = ClusterClient::new(config, connector);
//!
//!     let session = client
//!         .session("orders", SessionType::Data, SessionOptions::default())
//!         .await?;
//!     let transaction = session
//!         .transaction(TransactionType::Write, TransactionOptions::default())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ClusterClient (Public API)                  │
//! │  .session() │ .databases() │ ClusterSession.transaction()   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Failover Engine                           │
//! │  run_primary_replica │ run_any_replica │ seek/fetch         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Routing Table                             │
//! │  database → ReplicaSet snapshot │ atomic whole-entry swap   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   ServerStub / Connector                    │
//! │  one server per stub │ typed error classification           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod database;
mod error;
mod failover;
pub mod mock;
mod session;
mod stub;
mod topology;

// Public API exports
pub use client::ClusterClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use database::DatabaseManager;
pub use error::{Result, SdkError};
pub use failover::{
    Attempt, FETCH_REPLICAS_MAX_RETRIES, PRIMARY_REPLICA_TASK_MAX_RETRIES,
    WAIT_FOR_PRIMARY_REPLICA_SELECTION, fetch_replica_set, run_any_replica, run_primary_replica,
    seek_primary_replica,
};
pub use session::{BindingState, ClusterSession, ClusterTransaction};
pub use stub::{
    Connector, ServerStub, SessionHandle, SessionOptions, SessionType, TransactionHandle,
    TransactionOptions, TransactionType,
};
pub use topology::{ReplicaInfo, ReplicaSet, RoutingTable};
