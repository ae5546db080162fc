//! Identifiers and the deadlock report payload

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the application for as long as the
/// process runs. IDs are issued lazily and never reused; `0` is never issued.
pub type ThreadId = usize;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // 0 until the thread first touches the detector
    static CURRENT: Cell<ThreadId> = const { Cell::new(0) };
}

/// ID of the calling thread, issued on first use and stable afterwards
pub fn get_current_thread_id() -> ThreadId {
    CURRENT.with(|cell| match cell.get() {
        0 => {
            let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(id);
            id
        }
        id => id,
    })
}

/// Lock identifier type
///
/// Uniquely identifies a mutex in the application. Instrumented mutexes are
/// handed an ID from a process-wide counter at construction, so an ID is
/// never shared by two locks even after the first one is freed.
pub type LockId = usize;

/// One thread blocked inside a detected deadlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedThread {
    /// The blocked thread
    pub thread_id: ThreadId,
    /// The lock it is trying to acquire
    pub waiting_for: LockId,
    /// The thread currently holding that lock
    pub held_by: ThreadId,
    /// Call stack captured when the thread started waiting
    pub stack: String,
}

/// Represents the result of a deadlock detection pass
///
/// This structure contains everything the monitor knows about the threads
/// that can no longer make progress: the wait cycles, the lock each thread
/// wants, who holds it, and where each thread was when it began waiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockInfo {
    /// All threads in the deadlock set, in cycle order
    ///
    /// When several independent cycles exist they are concatenated, each one
    /// starting at its lowest thread ID.
    pub thread_cycle: Vec<ThreadId>,

    /// Every wait cycle found, each ordered so that element `i` waits on
    /// element `i + 1` and the last waits on the first.
    pub cycles: Vec<Vec<ThreadId>>,

    /// Per-thread details for every member of `thread_cycle`
    pub blocked: Vec<BlockedThread>,

    /// Threads waiting on a lock they already hold themselves
    ///
    /// These are reported alongside cycles but are never part of one.
    pub self_waits: Vec<BlockedThread>,

    /// Timestamp when the deadlock was detected
    ///
    /// ISO-8601 formatted timestamp indicating when the deadlock was detected.
    pub timestamp: String,
}

impl DeadlockInfo {
    /// Whether this report carries any stuck thread at all
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.self_waits.is_empty()
    }

    /// Look up the blocked-thread record for `thread_id`
    pub fn blocked_thread(&self, thread_id: ThreadId) -> Option<&BlockedThread> {
        self.blocked
            .iter()
            .chain(self.self_waits.iter())
            .find(|b| b.thread_id == thread_id)
    }

    /// Same deadlock as `other`, ignoring stacks and timestamp
    pub(crate) fn same_deadlock(&self, other: &DeadlockInfo) -> bool {
        fn key(b: &BlockedThread) -> (ThreadId, LockId, ThreadId) {
            (b.thread_id, b.waiting_for, b.held_by)
        }
        self.cycles == other.cycles
            && self.blocked.iter().map(key).eq(other.blocked.iter().map(key))
            && self
                .self_waits
                .iter()
                .map(key)
                .eq(other.self_waits.iter().map(key))
    }
}
