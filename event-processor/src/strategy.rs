use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::types::PartitionOwnership;

/// How aggressively an instance claims partitions each load-balancing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingStrategy {
    /// Claim at most one partition per cycle. Convergence takes multiple
    /// cycles but avoids synchronized mass reassignment.
    #[default]
    Balanced,
    /// Claim every unclaimed partition in one cycle, and steal up to fair
    /// share when nothing is unclaimed. Every instance computes the same
    /// target from the same snapshot, so a synchronized round converges the
    /// whole group at once.
    Greedy,
}

/// Compute the partition ids this instance should newly claim, given a
/// snapshot of active ownership. Pure and deterministic: the same snapshot
/// always yields the same claims, so repeated cycles over a balanced
/// assignment never thrash.
///
/// `active` must already be filtered to non-expired records with a non-empty
/// owner. Renewals for partitions already held are the caller's concern.
pub fn compute_claims(
    strategy: LoadBalancingStrategy,
    owner_id: &str,
    all_partition_ids: &[String],
    active: &[PartitionOwnership],
) -> Vec<String> {
    // Owner -> partitions held, sorted both ways for deterministic iteration.
    let mut owned: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    owned.entry(owner_id).or_default();
    for record in active {
        owned
            .entry(record.owner_id.as_str())
            .or_default()
            .insert(record.partition_id.as_str());
    }

    let claimed: HashSet<&str> = active.iter().map(|o| o.partition_id.as_str()).collect();
    let mut unclaimed: Vec<&String> = all_partition_ids
        .iter()
        .filter(|p| !claimed.contains(p.as_str()))
        .collect();
    unclaimed.sort();

    let mine = owned[owner_id].len();
    let my_share = fair_share(all_partition_ids.len(), &owned, owner_id);

    match strategy {
        LoadBalancingStrategy::Greedy => {
            if !unclaimed.is_empty() {
                unclaimed.into_iter().cloned().collect()
            } else if mine < my_share {
                steal(&mut owned, all_partition_ids.len(), owner_id, my_share - mine)
            } else {
                Vec::new()
            }
        }
        LoadBalancingStrategy::Balanced => {
            if let Some(partition) = unclaimed.first() {
                vec![(*partition).clone()]
            } else if mine < my_share {
                steal(&mut owned, all_partition_ids.len(), owner_id, 1)
            } else {
                Vec::new()
            }
        }
    }
}

/// Fair-share target for `owner_id`: `total / owner_count`, with the first
/// `total % owner_count` owners in owner-id order receiving one extra.
fn fair_share(total: usize, owned: &BTreeMap<&str, BTreeSet<&str>>, owner_id: &str) -> usize {
    let owner_count = owned.len();
    let base = total / owner_count;
    let extra = total % owner_count;
    let rank = owned
        .keys()
        .position(|o| *o == owner_id)
        .expect("owner present in map");
    base + usize::from(rank < extra)
}

/// Take `count` partitions from other owners, one at a time from the
/// currently most-loaded owner that still holds strictly more than its own
/// fair share. Ties break to the smaller owner id; within a victim the
/// highest-sorting partition id moves first.
fn steal(
    owned: &mut BTreeMap<&str, BTreeSet<&str>>,
    total: usize,
    owner_id: &str,
    count: usize,
) -> Vec<String> {
    let shares: BTreeMap<&str, usize> = owned
        .keys()
        .map(|o| (*o, fair_share(total, owned, o)))
        .collect();

    let mut claims = Vec::new();
    for _ in 0..count {
        let victim = owned
            .iter()
            .filter(|(o, partitions)| **o != owner_id && partitions.len() > shares[*o])
            .max_by_key(|(o, partitions)| (partitions.len(), std::cmp::Reverse(*o)))
            .map(|(o, _)| *o);
        let Some(victim) = victim else { break };

        let partitions = owned.get_mut(victim).expect("victim present in map");
        let Some(partition) = partitions.iter().next_back().copied() else {
            break;
        };
        partitions.remove(partition);
        claims.push(partition.to_string());
    }
    claims
}
