use crate::core::graph::{WaitForGraph, extract_cycles, find_deadlocked};
use crate::core::store::Snapshot;
use crate::core::types::{BlockedThread, DeadlockInfo, ThreadId};
use chrono::Utc;

/// Stack text used when a blocked thread has no recorded stack
const NO_STACK: &str = "<no stack recorded>";

/// Build the wait-for graph of `snapshot` and describe any deadlock in it
///
/// Returns `None` when every waiting thread can still make progress.
pub fn extract_deadlock_info(snapshot: &Snapshot) -> Option<DeadlockInfo> {
    let graph = WaitForGraph::build(&snapshot.desired, &snapshot.owner);
    let residual = find_deadlocked(&graph);

    if residual.is_empty() && graph.self_waits().is_empty() {
        return None;
    }

    let stack_of = |thread_id: ThreadId| {
        snapshot
            .stack
            .get(&thread_id)
            .cloned()
            .unwrap_or_else(|| NO_STACK.to_string())
    };

    let cycles = extract_cycles(&graph, &residual);
    let thread_cycle: Vec<ThreadId> = cycles.iter().flatten().copied().collect();

    let blocked = thread_cycle
        .iter()
        .filter_map(|&thread_id| graph.request_of(thread_id))
        .map(|edge| BlockedThread {
            thread_id: edge.requester,
            waiting_for: edge.lock_id,
            held_by: edge.holder,
            stack: stack_of(edge.requester),
        })
        .collect();

    let self_waits = graph
        .self_waits()
        .iter()
        .map(|&(thread_id, lock_id)| BlockedThread {
            thread_id,
            waiting_for: lock_id,
            held_by: thread_id,
            stack: stack_of(thread_id),
        })
        .collect();

    Some(DeadlockInfo {
        thread_cycle,
        cycles,
        blocked,
        self_waits,
        timestamp: Utc::now().to_rfc3339(),
    })
}
