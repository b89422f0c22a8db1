//! Cluster topology snapshots and the routing cache.
//!
//! A [`ReplicaSet`] is the client's belief about which servers host a
//! database and which of them is primary, captured at one topology fetch and
//! never mutated afterwards. The [`RoutingTable`] caches the most recent
//! snapshot per database; staleness is expected and corrected by retry, not
//! by synchronization.

use std::sync::Arc;

use dashmap::DashMap;

/// One server known to host a replica of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    /// Server identity, as `host:port`.
    pub address: String,

    /// Whether this replica is currently the primary.
    pub is_primary: bool,

    /// Whether the server suggests trying this replica first for
    /// read-tolerant operations.
    pub is_preferred: bool,
}

impl ReplicaInfo {
    /// Creates a new replica descriptor.
    #[must_use]
    pub fn new(address: impl Into<String>, is_primary: bool, is_preferred: bool) -> Self {
        Self { address: address.into(), is_primary, is_preferred }
    }
}

/// An immutable snapshot of a database's cluster topology.
///
/// Constructed fresh from each topology fetch; a new fetch produces a wholly
/// new snapshot that replaces the cache entry atomically. The primary and
/// preferred replicas are derived from per-replica flags, so they are always
/// elements of [`replicas`](Self::replicas) by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    database: String,
    replicas: Vec<ReplicaInfo>,
}

impl ReplicaSet {
    /// Creates a topology snapshot for `database`.
    #[must_use]
    pub fn new(database: impl Into<String>, replicas: Vec<ReplicaInfo>) -> Self {
        Self { database: database.into(), replicas }
    }

    /// Returns the database this topology describes.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns all known replicas, in the order the server reported them.
    #[must_use]
    pub fn replicas(&self) -> &[ReplicaInfo] {
        &self.replicas
    }

    /// Returns the replica currently believed to be primary, if any.
    ///
    /// Absent while the cluster is mid-election or the topology is
    /// unsettled.
    #[must_use]
    pub fn primary(&self) -> Option<&ReplicaInfo> {
        self.replicas.iter().find(|replica| replica.is_primary)
    }

    /// Returns the replica to try first for any-replica (read) operations.
    #[must_use]
    pub fn preferred(&self) -> Option<&ReplicaInfo> {
        self.replicas.iter().find(|replica| replica.is_preferred)
    }
}

/// Process-wide cache mapping database name to its most recently fetched
/// [`ReplicaSet`].
///
/// Entries are replaced whole (never merged) on each successful fetch, so no
/// cross-field invariant is at risk under concurrent access. Readers may
/// observe a stale entry; a missing or stale entry simply triggers a fresh
/// fetch, it is not an error.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: DashMap<String, Arc<ReplicaSet>>,
}

impl RoutingTable {
    /// Creates an empty routing table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup of the cached topology for `database`.
    #[must_use]
    pub fn get(&self, database: &str) -> Option<Arc<ReplicaSet>> {
        self.entries.get(database).map(|entry| Arc::clone(entry.value()))
    }

    /// Atomically replaces the cached topology for the snapshot's database.
    ///
    /// Returns the shared snapshot so the caller can keep using it without
    /// a second lookup.
    pub fn put(&self, replica_set: ReplicaSet) -> Arc<ReplicaSet> {
        let snapshot = Arc::new(replica_set);
        self.entries.insert(snapshot.database().to_owned(), Arc::clone(&snapshot));
        snapshot
    }

    /// Drops the cached topology for `database`, if any.
    pub fn remove(&self, database: &str) {
        self.entries.remove(database);
    }

    /// Returns the number of databases with cached topology.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no topology is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_replica_set() -> ReplicaSet {
        ReplicaSet::new(
            "orders",
            vec![
                ReplicaInfo::new("10.0.0.1:1729", false, true),
                ReplicaInfo::new("10.0.0.2:1729", true, false),
                ReplicaInfo::new("10.0.0.3:1729", false, false),
            ],
        )
    }

    #[test]
    fn primary_accessor_finds_flagged_replica() {
        let set = three_replica_set();
        let primary = set.primary().expect("primary present");
        assert_eq!(primary.address, "10.0.0.2:1729");
    }

    #[test]
    fn preferred_accessor_finds_flagged_replica() {
        let set = three_replica_set();
        let preferred = set.preferred().expect("preferred present");
        assert_eq!(preferred.address, "10.0.0.1:1729");
    }

    #[test]
    fn primary_absent_when_unflagged() {
        let set = ReplicaSet::new(
            "orders",
            vec![
                ReplicaInfo::new("10.0.0.1:1729", false, true),
                ReplicaInfo::new("10.0.0.2:1729", false, false),
            ],
        );
        assert!(set.primary().is_none());
    }

    #[test]
    fn routing_table_get_missing_is_none() {
        let table = RoutingTable::new();
        assert!(table.get("orders").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn routing_table_put_then_get() {
        let table = RoutingTable::new();
        table.put(three_replica_set());

        let cached = table.get("orders").expect("entry present");
        assert_eq!(cached.database(), "orders");
        assert_eq!(cached.replicas().len(), 3);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn routing_table_put_replaces_whole_entry() {
        let table = RoutingTable::new();
        let old = table.put(three_replica_set());

        table.put(ReplicaSet::new(
            "orders",
            vec![ReplicaInfo::new("10.0.0.3:1729", true, true)],
        ));

        let fresh = table.get("orders").expect("entry present");
        assert_eq!(fresh.replicas().len(), 1);
        assert_eq!(fresh.primary().expect("primary").address, "10.0.0.3:1729");

        // A holder of the old snapshot still sees it intact.
        assert_eq!(old.replicas().len(), 3);
    }

    #[test]
    fn routing_table_put_returns_snapshot() {
        let table = RoutingTable::new();
        let snapshot = table.put(three_replica_set());
        assert_eq!(snapshot.database(), "orders");
    }

    #[test]
    fn routing_table_remove_evicts_entry() {
        let table = RoutingTable::new();
        table.put(three_replica_set());
        table.remove("orders");
        assert!(table.get("orders").is_none());
    }
}
