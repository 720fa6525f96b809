// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node identity and subscription-edge bookkeeping.
//!
//! Every node in the routing graph gets a process-unique [`NodeId`]. The
//! producer → consumer edges created by subscriptions are mirrored into a
//! process-global table so that a new subscription can be validated against
//! the transitive subscriber set: the graph is a DAG by construction, and a
//! subscription that would close a cycle is refused before it is installed.
//!
//! The table stores edge counts rather than a set, so two independent
//! subscriptions between the same pair of nodes tear down correctly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Opaque identity of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh process-unique node id.
pub fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

type EdgeMap = HashMap<NodeId, HashMap<NodeId, usize>>;

fn edges() -> MutexGuard<'static, EdgeMap> {
    static EDGES: OnceLock<Mutex<EdgeMap>> = OnceLock::new();
    EDGES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Record a producer → consumer subscription edge.
pub(crate) fn add_edge(producer: NodeId, consumer: NodeId) {
    let mut map = edges();
    *map.entry(producer).or_default().entry(consumer).or_insert(0) += 1;
}

/// Drop one producer → consumer subscription edge.
pub(crate) fn remove_edge(producer: NodeId, consumer: NodeId) {
    let mut map = edges();
    if let Some(consumers) = map.get_mut(&producer) {
        if let Some(count) = consumers.get_mut(&consumer) {
            *count -= 1;
            if *count == 0 {
                consumers.remove(&consumer);
            }
        }
        if consumers.is_empty() {
            map.remove(&producer);
        }
    }
}

/// Whether subscribing `consumer` to `producer` would close a cycle.
///
/// True when `producer` is already reachable from `consumer` through existing
/// edges (including the degenerate self-subscription).
pub fn would_cycle(producer: NodeId, consumer: NodeId) -> bool {
    if producer == consumer {
        return true;
    }
    let map = edges();
    let mut stack = vec![consumer];
    let mut visited = std::collections::HashSet::new();
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if let Some(downstream) = map.get(&node) {
            for &next in downstream.keys() {
                if next == producer {
                    return true;
                }
                stack.push(next);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_unique() {
        let a = next_node_id();
        let b = next_node_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_self_subscription_is_a_cycle() {
        let a = next_node_id();
        assert!(would_cycle(a, a));
    }

    #[test]
    fn test_transitive_cycle_detected() {
        // a -> b -> c installed; subscribing a to c would close the loop.
        let (a, b, c) = (next_node_id(), next_node_id(), next_node_id());
        add_edge(a, b);
        add_edge(b, c);
        assert!(would_cycle(c, a));
        assert!(!would_cycle(a, c));
        remove_edge(a, b);
        remove_edge(b, c);
        assert!(!would_cycle(c, a));
    }

    #[test]
    fn test_edge_counts_survive_duplicate_teardown() {
        let (a, b) = (next_node_id(), next_node_id());
        add_edge(a, b);
        add_edge(a, b);
        remove_edge(a, b);
        // One of the two subscriptions remains; the reverse edge still cycles.
        assert!(would_cycle(b, a));
        remove_edge(a, b);
        assert!(!would_cycle(b, a));
    }
}
