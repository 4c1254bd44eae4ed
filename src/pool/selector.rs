//! The load-balancing policies.
//!
//! Every policy operates on a snapshot of the currently-healthy nodes, taken
//! by the pool under the node read locks. Snapshots preserve node index
//! order, which is what makes the round-robin cycle and the least-used
//! tie-break deterministic.

use crate::configuration::LoadBalanceStrategy;
use crate::pool::node::Node;
use crate::transport::NodeClient;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A healthy node paired with the client that was verified connected when the
/// snapshot was taken.
pub(crate) type HealthyNode<C> = (Arc<Node<C>>, Arc<C>);

/// Pick one entry of the (non-empty) healthy set according to `strategy`.
pub(crate) fn select<'a, C: NodeClient>(
    strategy: LoadBalanceStrategy,
    healthy: &'a [HealthyNode<C>],
    round_robin: &AtomicU64,
) -> &'a HealthyNode<C> {
    debug_assert!(!healthy.is_empty());
    match strategy {
        LoadBalanceStrategy::RoundRobin => pick_round_robin(healthy, round_robin),
        LoadBalanceStrategy::Random => {
            &healthy[rand::thread_rng().gen_range(0..healthy.len())]
        }
        LoadBalanceStrategy::LeastUsed => pick_least_used(healthy),
        LoadBalanceStrategy::WeightedRoundRobin => pick_weighted(healthy, round_robin),
    }
}

/// The counter is pool-global rather than per-healthy-set, so membership
/// changes cause harmless skips; the cycle is fair over time.
fn pick_round_robin<'a, C: NodeClient>(
    healthy: &'a [HealthyNode<C>],
    round_robin: &AtomicU64,
) -> &'a HealthyNode<C> {
    let index = round_robin.fetch_add(1, Ordering::Relaxed) as usize % healthy.len();
    &healthy[index]
}

/// Linear scan for the smallest usage count; on a tie the first node in index
/// order wins.
fn pick_least_used<C: NodeClient>(healthy: &[HealthyNode<C>]) -> &HealthyNode<C> {
    let mut selected = &healthy[0];
    let mut min_used = selected.0.total_used.load(Ordering::Relaxed);
    for entry in &healthy[1..] {
        let used = entry.0.total_used.load(Ordering::Relaxed);
        if used < min_used {
            min_used = used;
            selected = entry;
        }
    }
    selected
}

/// Randomised weighted draw: a node's probability of selection is
/// `weight / Σweight`. Nodes with weight 0 are never drawn. When every
/// healthy node has weight 0 the draw degenerates and we fall back to plain
/// round-robin.
fn pick_weighted<'a, C: NodeClient>(
    healthy: &'a [HealthyNode<C>],
    round_robin: &AtomicU64,
) -> &'a HealthyNode<C> {
    let weights: Vec<u64> = healthy
        .iter()
        .map(|(node, _)| u64::from(node.weight()))
        .collect();
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return pick_round_robin(healthy, round_robin);
    }

    let draw = rand::thread_rng().gen_range(0..total);
    let mut running = 0;
    for (entry, weight) in healthy.iter().zip(&weights) {
        running += weight;
        if draw < running {
            return entry;
        }
    }
    // Unreachable while the weights vector matches the draw range.
    &healthy[0]
}
