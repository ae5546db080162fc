//! Cycle detection over a wait-for graph
//!
//! Kahn's topological reduction: repeatedly remove vertices nobody waits on.
//! A finite directed graph is acyclic iff every vertex gets removed, so
//! whatever is left lies on a cycle or downstream of one. In graphs built from
//! a snapshot each thread waits on at most one lock (out-degree <= 1), which
//! means the residual set is exactly the union of the cycles.

use crate::core::graph::WaitForGraph;
use crate::core::types::ThreadId;
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Run Kahn's reduction and return the unprocessed vertices, sorted
///
/// Pure function of the graph: calling it twice on the same graph yields the
/// same set.
pub fn find_deadlocked(graph: &WaitForGraph) -> Vec<ThreadId> {
    let mut in_degree: FxHashMap<ThreadId, usize> = graph
        .vertices
        .iter()
        .map(|(&tid, v)| (tid, v.in_degree))
        .collect();

    let mut roots: Vec<ThreadId> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&tid, _)| tid)
        .collect();
    roots.sort_unstable();
    let mut queue: VecDeque<ThreadId> = roots.into();

    let mut processed = FxHashSet::default();
    while let Some(current) = queue.pop_front() {
        processed.insert(current);
        for &next in &graph.vertices[&current].waits_on {
            if let Some(d) = in_degree.get_mut(&next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if processed.len() == graph.vertices.len() {
        return Vec::new();
    }

    let mut residual: Vec<ThreadId> = graph
        .vertices
        .keys()
        .copied()
        .filter(|tid| !processed.contains(tid))
        .collect();
    residual.sort_unstable();
    residual
}

/// Split a residual set into ordered cycles
///
/// Each cycle starts at its lowest thread ID and lists threads in wait order:
/// element `i` waits on element `i + 1`, the last waits on the first. When a
/// vertex waits on several threads the walk follows the first edge that stays
/// inside the residual set.
pub fn extract_cycles(graph: &WaitForGraph, residual: &[ThreadId]) -> Vec<Vec<ThreadId>> {
    let in_residual: FxHashSet<ThreadId> = residual.iter().copied().collect();
    let mut visited: FxHashSet<ThreadId> = FxHashSet::default();
    let mut cycles = Vec::new();

    for &start in residual {
        if visited.contains(&start) {
            continue;
        }

        let mut path = Vec::new();
        let mut position: FxHashMap<ThreadId, usize> = FxHashMap::default();
        let mut current = start;

        loop {
            if let Some(&idx) = position.get(&current) {
                let mut cycle = path[idx..].to_vec();
                let min_idx = cycle
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, tid)| *tid)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                cycle.rotate_left(min_idx);
                cycles.push(cycle);
                break;
            }
            if !visited.insert(current) {
                // Joined a walk that was already resolved
                break;
            }

            position.insert(current, path.len());
            path.push(current);

            let next = graph
                .vertex(current)
                .and_then(|v| v.waits_on.iter().copied().find(|t| in_residual.contains(t)));
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
    }

    cycles.sort();
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph_from(edges: &[(ThreadId, ThreadId)]) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for (i, &(from, to)) in edges.iter().enumerate() {
            graph.add_edge(from, to, 1000 + i);
        }
        graph
    }

    #[test]
    fn test_no_cycle() {
        let graph = graph_from(&[(1, 2), (2, 3)]);
        assert!(find_deadlocked(&graph).is_empty());
    }

    #[test]
    fn test_simple_cycle() {
        let graph = graph_from(&[(1, 2), (2, 3), (3, 1)]);
        let residual = find_deadlocked(&graph);
        assert_eq!(residual, vec![1, 2, 3]);
        assert_eq!(extract_cycles(&graph, &residual), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_waiter_outside_cycle_is_not_reported() {
        // 4 waits on 1, which is stuck in 1 <-> 2
        let graph = graph_from(&[(1, 2), (2, 1), (4, 1)]);
        assert_eq!(find_deadlocked(&graph), vec![1, 2]);
    }

    #[test]
    fn test_two_disjoint_cycles() {
        let graph = graph_from(&[(5, 6), (6, 5), (3, 1), (1, 2), (2, 3)]);
        let residual = find_deadlocked(&graph);
        assert_eq!(residual, vec![1, 2, 3, 5, 6]);
        assert_eq!(
            extract_cycles(&graph, &residual),
            vec![vec![1, 2, 3], vec![5, 6]]
        );
    }

    #[test]
    fn test_breaking_one_edge_clears_ring() {
        let ring: Vec<_> = (1..=6).map(|i| (i, i % 6 + 1)).collect();
        assert_eq!(find_deadlocked(&graph_from(&ring)).len(), 6);

        for skip in 0..ring.len() {
            let broken: Vec<_> = ring
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .map(|(_, &e)| e)
                .collect();
            assert!(find_deadlocked(&graph_from(&broken)).is_empty());
        }
    }

    proptest! {
        #[test]
        fn acyclic_graphs_reduce_completely(
            edges in prop::collection::vec((0usize..30, 0usize..30), 0..80)
        ) {
            // Only keep edges from a lower to a higher ID: never a cycle
            let forward: Vec<_> = edges.into_iter().filter(|(a, b)| a < b).collect();
            prop_assert!(find_deadlocked(&graph_from(&forward)).is_empty());
        }

        #[test]
        fn reduction_is_idempotent(
            edges in prop::collection::vec((0usize..12, 0usize..12), 0..40)
        ) {
            let edges: Vec<_> = edges.into_iter().filter(|(a, b)| a != b).collect();
            let graph = graph_from(&edges);
            prop_assert_eq!(find_deadlocked(&graph), find_deadlocked(&graph));
        }

        #[test]
        fn rings_report_every_member(n in 2usize..40) {
            let ring: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
            let graph = graph_from(&ring);
            let residual = find_deadlocked(&graph);
            prop_assert_eq!(residual.len(), n);
            prop_assert_eq!(extract_cycles(&graph, &residual), vec![(0..n).collect::<Vec<_>>()]);
        }
    }
}
