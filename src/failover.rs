//! The failover engine: primary-replica and any-replica retry strategies.
//!
//! Both strategies execute a caller-supplied operation against a chosen
//! replica and recover routing staleness by refreshing topology and
//! rerouting. The operation receives the replica to target and an
//! [`Attempt`] discriminant: [`Attempt::Initial`] for the first try,
//! [`Attempt::Reroute`] for every try after a reroute, where dependent
//! state (a session underneath a transaction) must be rebuilt against the
//! new server. Operations that need no rebuilding simply ignore the
//! discriminant.
//!
//! The engine runs on the caller's task; waits are plain suspensions via
//! `tokio::time::sleep`, so many calls may be in flight and waiting
//! concurrently. Concurrent discoveries for the same database race
//! benignly: the routing cache is replaced whole-entry, last fetch wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use crate::config::ClientConfig;
use crate::error::{ClusterUnavailableSnafu, Result};
use crate::topology::{ReplicaInfo, ReplicaSet};

/// Retry ceiling for a primary-replica operation.
pub const PRIMARY_REPLICA_TASK_MAX_RETRIES: u32 = 10;

/// Retry ceiling while waiting for the cluster to elect a primary.
pub const FETCH_REPLICAS_MAX_RETRIES: u32 = 10;

/// Wait between primary-discovery attempts while an election may be in
/// progress.
pub const WAIT_FOR_PRIMARY_REPLICA_SELECTION: Duration = Duration::from_millis(2000);

/// Which attempt of a failover operation is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The first attempt.
    Initial,
    /// An attempt after a reroute; dependent state opened by a previous
    /// attempt is invalid and must be rebuilt against the new replica.
    Reroute,
}

/// Executes `operation` against the current primary replica of `database`,
/// rediscovering the primary and retrying when routing is stale.
///
/// Used for all write-sensitive operations: correctness requires hitting
/// the true primary.
///
/// The cached primary is trusted first; `NotPrimary` or `Unreachable`
/// failures trigger a wait, a fresh discovery, and a
/// [`Attempt::Reroute`] retry, up to
/// [`PRIMARY_REPLICA_TASK_MAX_RETRIES`] attempts. Any other error is
/// propagated immediately without retry.
///
/// # Errors
///
/// Returns `ClusterUnavailable` when discovery or the retry ceiling is
/// exhausted, or the first non-retryable error the operation produced.
pub async fn run_primary_replica<T, F, Fut>(
    client: &ClusterClient,
    database: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(ReplicaInfo, Attempt) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cached_primary =
        client.routing_table().get(database).and_then(|set| set.primary().cloned());
    let mut primary = match cached_primary {
        Some(primary) => primary,
        None => seek_primary_replica(client, database).await?,
    };

    for attempt in 0..PRIMARY_REPLICA_TASK_MAX_RETRIES {
        let kind = if attempt == 0 { Attempt::Initial } else { Attempt::Reroute };

        match operation(primary.clone(), kind).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_replica_failover() => {
                warn!(
                    database,
                    address = %primary.address,
                    attempt,
                    error = %err,
                    "primary-replica attempt failed; rediscovering primary"
                );
                wait_for_primary_selection(client.config()).await;
                primary = seek_primary_replica(client, database).await?;
            }
            Err(err) => return Err(err),
        }
    }

    ClusterUnavailableSnafu { attempted: client.seed_addresses().to_vec() }.fail()
}

/// Executes `operation` against replicas of `database` in preference order,
/// tolerating unreachable nodes.
///
/// Used for read-tolerant operations where staleness of "primary" is
/// acceptable. The preferred replica is tried first with
/// [`Attempt::Initial`]; every further candidate is tried with
/// [`Attempt::Reroute`]. `Unreachable` advances to the next candidate (the
/// expected degraded path); any other error, including `NotPrimary`, is
/// propagated immediately.
///
/// # Errors
///
/// Returns `ClusterUnavailable` naming every replica tried when all of
/// them are unreachable, or the first non-tolerated error.
pub async fn run_any_replica<T, F, Fut>(
    client: &ClusterClient,
    database: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(ReplicaInfo, Attempt) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let replica_set = match client.routing_table().get(database) {
        Some(set) => set,
        None => fetch_replica_set(client, database).await?,
    };

    let candidates = order_by_preference(&replica_set);
    let mut attempted = Vec::with_capacity(candidates.len());

    for (index, replica) in candidates.into_iter().enumerate() {
        let kind = if index == 0 { Attempt::Initial } else { Attempt::Reroute };
        attempted.push(replica.address.clone());

        match operation(replica.clone(), kind).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_unreachable() => {
                warn!(
                    database,
                    address = %replica.address,
                    error = %err,
                    "replica unreachable; trying next candidate"
                );
            }
            Err(err) => return Err(err),
        }
    }

    ClusterUnavailableSnafu { attempted }.fail()
}

/// Discovers the current primary replica of `database`, waiting out an
/// in-progress election.
///
/// Fetches fresh topology up to [`FETCH_REPLICAS_MAX_RETRIES`] times,
/// sleeping [`WAIT_FOR_PRIMARY_REPLICA_SELECTION`] between fetches that
/// name no primary. Performs exactly one fetch per iteration and no wait
/// after the final fetch.
///
/// # Errors
///
/// Returns `ClusterUnavailable` when no fetch succeeds or no primary is
/// named within the ceiling.
pub async fn seek_primary_replica(
    client: &ClusterClient,
    database: &str,
) -> Result<ReplicaInfo> {
    for attempt in 1..=FETCH_REPLICAS_MAX_RETRIES {
        let replica_set = fetch_replica_set(client, database).await?;

        if let Some(primary) = replica_set.primary() {
            debug!(database, address = %primary.address, "discovered primary replica");
            return Ok(primary.clone());
        }

        debug!(database, attempt, "topology names no primary; election may be in progress");
        if attempt < FETCH_REPLICAS_MAX_RETRIES {
            wait_for_primary_selection(client.config()).await;
        }
    }

    ClusterUnavailableSnafu { attempted: client.seed_addresses().to_vec() }.fail()
}

/// Fetches a fresh topology snapshot for `database` from the first seed
/// address that answers, caching it in the routing table.
///
/// One pass over the seeds, in configured order: a seed that is unreachable
/// or not primary advances the scan; a deterministic server error is
/// propagated immediately rather than masked by further seeds. No
/// per-address retry; waiting out elections is the caller's concern.
///
/// # Errors
///
/// Returns `ClusterUnavailable` naming every seed when none answers.
pub async fn fetch_replica_set(
    client: &ClusterClient,
    database: &str,
) -> Result<Arc<ReplicaSet>> {
    for seed in client.seed_addresses() {
        let stub = match client.stub(seed).await {
            Ok(stub) => stub,
            Err(err) if err.is_replica_failover() => {
                debug!(address = %seed, error = %err, "seed not connectable for topology fetch");
                continue;
            }
            Err(err) => return Err(err),
        };

        match stub.replica_topology(database).await {
            Ok(replica_set) => {
                info!(
                    database,
                    address = %seed,
                    replicas = replica_set.replicas().len(),
                    "fetched replica topology"
                );
                return Ok(client.routing_table().put(replica_set));
            }
            Err(err) if err.is_replica_failover() => {
                debug!(address = %seed, error = %err, "seed did not answer topology fetch");
            }
            Err(err) => return Err(err),
        }
    }

    ClusterUnavailableSnafu { attempted: client.seed_addresses().to_vec() }.fail()
}

/// Suspends the calling task for the primary-election wait, jittered by the
/// configured factor.
async fn wait_for_primary_selection(config: &ClientConfig) {
    let wait = jittered(WAIT_FOR_PRIMARY_REPLICA_SELECTION, config.selection_wait_jitter());
    tokio::time::sleep(wait).await;
}

/// Orders a topology snapshot's replicas for any-replica attempts: the
/// preferred replica first, then the remaining replicas in snapshot order.
fn order_by_preference(replica_set: &ReplicaSet) -> Vec<ReplicaInfo> {
    let mut candidates = Vec::with_capacity(replica_set.replicas().len());

    if let Some(preferred) = replica_set.preferred() {
        candidates.push(preferred.clone());
    }
    let first = candidates.first().map(|replica: &ReplicaInfo| replica.address.clone());

    for replica in replica_set.replicas() {
        if Some(&replica.address) != first.as_ref() {
            candidates.push(replica.clone());
        }
    }

    candidates
}

/// Applies jitter in `[dur * (1 - factor), dur * (1 + factor)]` to spread
/// concurrent clients' rediscovery attempts.
fn jittered(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn replica_set(replicas: Vec<ReplicaInfo>) -> ReplicaSet {
        ReplicaSet::new("orders", replicas)
    }

    #[test]
    fn retry_ceilings_and_wait() {
        assert_eq!(PRIMARY_REPLICA_TASK_MAX_RETRIES, 10);
        assert_eq!(FETCH_REPLICAS_MAX_RETRIES, 10);
        assert_eq!(WAIT_FOR_PRIMARY_REPLICA_SELECTION, Duration::from_millis(2000));
    }

    #[test]
    fn order_by_preference_puts_preferred_first() {
        let set = replica_set(vec![
            ReplicaInfo::new("10.0.0.1:1729", true, false),
            ReplicaInfo::new("10.0.0.2:1729", false, true),
            ReplicaInfo::new("10.0.0.3:1729", false, false),
        ]);

        let order: Vec<String> =
            order_by_preference(&set).into_iter().map(|r| r.address).collect();

        assert_eq!(order, ["10.0.0.2:1729", "10.0.0.1:1729", "10.0.0.3:1729"]);
    }

    #[test]
    fn order_by_preference_has_no_duplicates() {
        let set = replica_set(vec![
            ReplicaInfo::new("10.0.0.1:1729", false, true),
            ReplicaInfo::new("10.0.0.2:1729", true, false),
        ]);

        let order = order_by_preference(&set);
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].address, "10.0.0.1:1729");
        assert_eq!(order[1].address, "10.0.0.2:1729");
    }

    #[test]
    fn order_by_preference_without_preferred_keeps_snapshot_order() {
        let set = replica_set(vec![
            ReplicaInfo::new("10.0.0.1:1729", true, false),
            ReplicaInfo::new("10.0.0.2:1729", false, false),
        ]);

        let order: Vec<String> =
            order_by_preference(&set).into_iter().map(|r| r.address).collect();

        assert_eq!(order, ["10.0.0.1:1729", "10.0.0.2:1729"]);
    }

    #[test]
    fn jittered_zero_factor_is_identity() {
        let dur = Duration::from_millis(2000);
        assert_eq!(jittered(dur, 0.0), dur);
    }

    #[test]
    fn jittered_within_bounds() {
        let dur = Duration::from_millis(1000);
        let factor = 0.25;

        for _ in 0..100 {
            let value = jittered(dur, factor).as_millis();
            assert!((750..=1250).contains(&value), "jittered duration {value}ms out of bounds");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod proptest_tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Jittered duration never exceeds base * (1 + factor).
        #[test]
        fn prop_jitter_never_exceeds_upper_bound(
            base_ms in 1u64..10000,
            factor in 0.0f64..=1.0
        ) {
            let dur = Duration::from_millis(base_ms);
            let value = jittered(dur, factor);

            let max_allowed = Duration::from_nanos(
                (dur.as_nanos() as f64 * (1.0 + factor)).ceil() as u64
            );

            prop_assert!(
                value <= max_allowed,
                "jittered {:?} exceeds max {:?} for base {:?} with factor {}",
                value, max_allowed, dur, factor
            );
        }

        /// Jittered duration is never below base * (1 - factor).
        #[test]
        fn prop_jitter_never_below_lower_bound(
            base_ms in 1u64..10000,
            factor in 0.0f64..=1.0
        ) {
            let dur = Duration::from_millis(base_ms);
            let value = jittered(dur, factor);

            let min_allowed = Duration::from_nanos(
                (dur.as_nanos() as f64 * (1.0 - factor)).floor() as u64
            );

            prop_assert!(
                value >= min_allowed,
                "jittered {:?} below min {:?} for base {:?} with factor {}",
                value, min_allowed, dur, factor
            );
        }

        /// Zero factor returns the exact duration.
        #[test]
        fn prop_zero_jitter_is_identity(base_ms in 1u64..10000) {
            let dur = Duration::from_millis(base_ms);
            prop_assert_eq!(jittered(dur, 0.0), dur);
        }

        /// Factor above 1.0 is clamped: jitter never exceeds 2x the base.
        #[test]
        fn prop_large_factor_clamped(
            base_ms in 1u64..10000,
            factor in 1.0f64..100.0
        ) {
            let dur = Duration::from_millis(base_ms);
            let value = jittered(dur, factor);

            let max_allowed = Duration::from_nanos((dur.as_nanos() * 2) as u64);

            prop_assert!(
                value <= max_allowed,
                "jittered {:?} exceeds 2x base {:?} with factor {}",
                value, dur, factor
            );
        }
    }
}
