//! Wait-For Graph built from a store snapshot
//!
//! Vertices are thread IDs; an edge `A -> B` means thread A is blocked on a
//! lock currently owned by thread B. The graph is rebuilt from scratch on
//! every detection pass and never mutated by the store, so it needs no
//! synchronization once built.
//!
//! # How it works
//!
//! For every `(thread, lock)` pending request we look up the lock's owner:
//! 1. *No owner*: the lock is untracked or was released between the time the
//!    thread asked and the snapshot. The request cannot be part of a cycle
//!    and is dropped.
//! 2. *Owner is the requester*: the thread is waiting on itself. That is not
//!    a two-party wait, so it is kept aside in `self_waits`.
//! 3. *Another owner*: edge `requester -> owner`, owner's in-degree + 1.

use crate::core::types::{LockId, ThreadId};
use fxhash::FxHashMap;

/// A single "requester waits on holder" relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEdge {
    /// Blocked thread
    pub requester: ThreadId,
    /// Thread holding the lock the requester wants
    pub holder: ThreadId,
    /// The contended lock
    pub lock_id: LockId,
}

/// Per-thread vertex data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vertex {
    /// Number of threads waiting on this one
    pub in_degree: usize,
    /// Threads this one waits on
    pub waits_on: Vec<ThreadId>,
}

/// Represents a directed graph of thread wait relationships
#[derive(Debug, Clone, Default)]
pub struct WaitForGraph {
    pub(crate) vertices: FxHashMap<ThreadId, Vertex>,
    /// The lock behind each requester's outgoing edge
    pub(crate) requests: FxHashMap<ThreadId, WaitEdge>,
    /// Threads waiting on a lock they hold themselves: (thread, lock)
    pub(crate) self_waits: Vec<(ThreadId, LockId)>,
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from the `desired` and `owner` maps of one snapshot
    pub fn build(
        desired: &FxHashMap<ThreadId, LockId>,
        owner: &FxHashMap<LockId, ThreadId>,
    ) -> Self {
        let mut graph = WaitForGraph::new();

        for (&requester, &lock_id) in desired {
            let Some(&holder) = owner.get(&lock_id) else {
                continue;
            };

            if holder == requester {
                graph.self_waits.push((requester, lock_id));
                continue;
            }

            graph.add_edge(requester, holder, lock_id);
        }

        graph.self_waits.sort_unstable();
        graph
    }

    /// Add a directed edge: `from` thread waits for `to` thread on `lock_id`
    pub fn add_edge(&mut self, from: ThreadId, to: ThreadId, lock_id: LockId) {
        self.vertices.entry(from).or_default().waits_on.push(to);
        self.vertices.entry(to).or_default().in_degree += 1;
        self.requests.insert(
            from,
            WaitEdge {
                requester: from,
                holder: to,
                lock_id,
            },
        );
    }

    /// Number of vertices in the graph
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges in the graph
    pub fn edge_count(&self) -> usize {
        self.vertices.values().map(|v| v.waits_on.len()).sum()
    }

    /// Vertex data for `thread_id`
    pub fn vertex(&self, thread_id: ThreadId) -> Option<&Vertex> {
        self.vertices.get(&thread_id)
    }

    /// The wait edge leaving `thread_id`, if it is blocked on another thread
    pub fn request_of(&self, thread_id: ThreadId) -> Option<&WaitEdge> {
        self.requests.get(&thread_id)
    }

    /// Threads waiting on a lock they already own, sorted
    pub fn self_waits(&self) -> &[(ThreadId, LockId)] {
        &self.self_waits
    }
}
