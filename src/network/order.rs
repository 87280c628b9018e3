//! Evolution order of the layers of a network.
//!
//! Every layer has at most one predecessor, so the connectivity graph is a forest as long as it
//! has no cycle. The evolution order places every layer after its predecessor.
use std::collections::BTreeSet;

use itertools::Itertools;

use super::network::{LayerId, Network};
use crate::error::NetworkError;

/// Order nodes such that every node comes after its predecessor.
///
/// Nodes are visited in the order given. In each round, the first remaining node whose
/// predecessor is either absent or already placed is appended, so that parallel branches keep
/// their relative order. This takes `O(n^2 log n)` time for `n` nodes.
///
/// Returns the nodes that could not be placed if the predecessor relation has a cycle.
pub fn resolve_order<K, F>(nodes: &[K], predecessor: F) -> Result<Vec<K>, Vec<K>>
where
    K: Copy + Ord,
    F: Fn(K) -> Option<K>,
{
    let mut remaining: Vec<K> = nodes.to_vec();
    let mut remaining_set: BTreeSet<K> = nodes.iter().copied().collect();
    let mut order = Vec::with_capacity(nodes.len());

    while !remaining.is_empty() {
        let next = remaining.iter().position(|node| match predecessor(*node) {
            Some(source) => !remaining_set.contains(&source),
            None => true,
        });
        match next {
            Some(position) => {
                let node = remaining.remove(position);
                remaining_set.remove(&node);
                order.push(node);
            }
            None => return Err(remaining),
        }
    }

    Ok(order)
}

impl Network {
    /// Compute the evolution order of the current connectivity graph.
    pub(super) fn resolve_evolution_order(&self) -> Result<Vec<LayerId>, NetworkError> {
        let nodes: Vec<LayerId> = self.layers.keys().copied().collect();
        resolve_order(&nodes, |id| self.predecessors.get(&id).copied()).map_err(|remaining| {
            NetworkError::UnresolvableOrder(format!(
                "cycle among layers {}",
                remaining
                    .iter()
                    .filter_map(|id| self.name_of(*id))
                    .map(|name| format!("`{}`", name))
                    .join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    const SEED: u64 = 42;

    fn order_of(nodes: &[usize], edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
        let predecessors: HashMap<usize, usize> =
            edges.iter().map(|(source, target)| (*target, *source)).collect();
        resolve_order(nodes, |node| predecessors.get(&node).copied())
    }

    #[test]
    fn test_chain_in_reverse() {
        assert_eq!(
            order_of(&[0, 1, 2, 3], &[(3, 2), (2, 1), (1, 0)]),
            Ok(vec![3, 2, 1, 0])
        );
    }

    #[test]
    fn test_parallel_branches_keep_insertion_order() {
        // 0 -> 2, 1 -> 3, 4 alone
        assert_eq!(
            order_of(&[0, 1, 2, 3, 4], &[(0, 2), (1, 3)]),
            Ok(vec![0, 1, 2, 3, 4])
        );
        // 3 -> 0 -> 1, 2 alone
        assert_eq!(
            order_of(&[0, 1, 2, 3], &[(3, 0), (0, 1)]),
            Ok(vec![2, 3, 0, 1])
        );
        assert_eq!(order_of(&[], &[]), Ok(vec![]));
    }

    #[test]
    fn test_cycle() {
        assert_eq!(
            order_of(&[0, 1, 2, 3], &[(0, 1), (1, 2), (2, 1)]),
            Err(vec![1, 2])
        );
        assert_eq!(order_of(&[0, 1], &[(1, 1)]), Err(vec![1]));
    }

    #[test]
    fn test_random_forest() {
        let mut rng = StdRng::seed_from_u64(SEED);
        for _ in 0..100 {
            let num_nodes = rng.gen_range(1..30);
            // Build a forest by only pointing to nodes with a smaller label, then shuffle labels
            let mut labels: Vec<usize> = (0..num_nodes).collect();
            for k in (1..num_nodes).rev() {
                labels.swap(k, rng.gen_range(0..=k));
            }
            let mut edges: Vec<(usize, usize)> = vec![];
            for k in 1..num_nodes {
                if rng.gen_bool(0.7) {
                    edges.push((labels[rng.gen_range(0..k)], labels[k]));
                }
            }

            let nodes: Vec<usize> = (0..num_nodes).collect();
            let order = order_of(&nodes, &edges).unwrap();
            assert_eq!(order.len(), num_nodes);
            let position: HashMap<usize, usize> =
                order.iter().enumerate().map(|(k, node)| (*node, k)).collect();
            for (source, target) in edges.iter() {
                assert!(position[source] < position[target]);
            }
        }
    }
}
