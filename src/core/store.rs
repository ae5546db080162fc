//! Lock State Store
//!
//! The single source of truth for "who wants what" and "who owns what".
//! Three maps, each behind its own mutex:
//!
//! - `owner`:   lock   -> thread holding it, plus pending handoffs
//! - `desired`: thread -> lock it is blocked acquiring
//! - `stack`:   thread -> stack captured when it started waiting
//!
//! Whenever more than one map is touched, the mutexes are taken in the fixed
//! order `owner` -> `desired` -> `stack` (maps not needed are skipped). With a
//! single global order the store's own locking can never form a cycle.
//! Every critical section only copies or mutates map entries; nothing here
//! blocks on a lock owned by an observed thread.
//!
//! Instrumented locks report a release only after the real unlock, so under
//! contention the next owner can record itself first. Such a takeover is
//! remembered as a handoff and the late release of the previous owner is
//! absorbed instead of being treated as misuse.

use crate::core::error::UsageError;
use crate::core::types::{LockId, ThreadId};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;

/// Point-in-time copy of the three store maps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Thread -> lock it is waiting for
    pub desired: FxHashMap<ThreadId, LockId>,
    /// Lock -> owning thread
    pub owner: FxHashMap<LockId, ThreadId>,
    /// Thread -> stack text captured when it started waiting
    pub stack: FxHashMap<ThreadId, String>,
}

/// Outcome of a recorded release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The releasing thread was the recorded owner and the entry was cleared
    Cleared,
    /// The lock had already been taken over; the pending handoff was consumed
    HandedOff,
}

#[derive(Default)]
struct Ownership {
    owner: FxHashMap<LockId, ThreadId>,
    // (lock, previous owner) whose release is still outstanding
    handoffs: FxHashSet<(LockId, ThreadId)>,
}

/// Concurrent store of lock wants and ownership
#[derive(Default)]
pub struct LockStateStore {
    owner: Mutex<Ownership>,
    desired: Mutex<FxHashMap<ThreadId, LockId>>,
    stack: Mutex<FxHashMap<ThreadId, String>>,
}

impl LockStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `thread_id` is about to block on `lock_id`
    ///
    /// `desired` and `stack` are written together so a snapshot sees both or
    /// neither. The request is recorded even when the thread already owns the
    /// lock: it really is about to wait, and the monitor reports the
    /// self-wait. The caller is told through the returned error.
    pub fn before_acquire(
        &self,
        thread_id: ThreadId,
        lock_id: LockId,
        stack: String,
    ) -> Result<(), UsageError> {
        let owner = self.owner.lock();
        let mut desired = self.desired.lock();
        let mut stacks = self.stack.lock();

        desired.insert(thread_id, lock_id);
        stacks.insert(thread_id, stack);

        if owner.owner.get(&lock_id) == Some(&thread_id) {
            return Err(UsageError::Reacquire { thread_id, lock_id });
        }
        Ok(())
    }

    /// Record that `thread_id` now holds `lock_id`
    ///
    /// Clears the pending request and sets the owner as one unit, so no
    /// snapshot sees the thread both wanting and owning the lock.
    ///
    /// The real lock is held, so any other recorded owner has already
    /// unlocked and not yet reported it. That owner is returned and its
    /// release is expected later as a handoff.
    pub fn after_acquire(&self, thread_id: ThreadId, lock_id: LockId) -> Option<ThreadId> {
        let mut owner = self.owner.lock();
        let mut desired = self.desired.lock();
        let mut stacks = self.stack.lock();

        desired.remove(&thread_id);
        stacks.remove(&thread_id);

        match owner.owner.insert(lock_id, thread_id) {
            Some(previous) if previous != thread_id => {
                owner.handoffs.insert((lock_id, previous));
                Some(previous)
            }
            _ => None,
        }
    }

    /// Withdraw the pending request of `thread_id` without taking ownership
    pub fn acquire_failed(&self, thread_id: ThreadId) {
        let mut desired = self.desired.lock();
        let mut stacks = self.stack.lock();
        desired.remove(&thread_id);
        stacks.remove(&thread_id);
    }

    /// Record that `thread_id` released `lock_id`
    ///
    /// Only the recorded owner may clear the entry. A thread whose lock was
    /// already taken over consumes its handoff instead. Anything else leaves
    /// the map untouched and is returned as a usage error.
    pub fn after_release(&self, thread_id: ThreadId, lock_id: LockId) -> Result<Release, UsageError> {
        let mut owner = self.owner.lock();
        if owner.handoffs.remove(&(lock_id, thread_id)) {
            return Ok(Release::HandedOff);
        }
        match owner.owner.get(&lock_id).copied() {
            Some(current) if current == thread_id => {
                owner.owner.remove(&lock_id);
                Ok(Release::Cleared)
            }
            Some(current) => Err(UsageError::ForeignRelease {
                thread_id,
                lock_id,
                owner: current,
            }),
            None => Err(UsageError::NotHeld { thread_id, lock_id }),
        }
    }

    /// Drop any ownership record of a lock that is being destroyed
    ///
    /// Returns the thread that was still recorded as holding it, if any.
    pub fn forget_lock(&self, lock_id: LockId) -> Option<ThreadId> {
        let mut owner = self.owner.lock();
        owner.handoffs.retain(|&(lock, _)| lock != lock_id);
        owner.owner.remove(&lock_id)
    }

    /// Current owner of `lock_id`
    pub fn owner_of(&self, lock_id: LockId) -> Option<ThreadId> {
        self.owner.lock().owner.get(&lock_id).copied()
    }

    /// Number of takeovers whose previous owner has not reported its release
    pub fn pending_handoffs(&self) -> usize {
        self.owner.lock().handoffs.len()
    }

    /// Lock `thread_id` is currently waiting for
    pub fn desired_by(&self, thread_id: ThreadId) -> Option<LockId> {
        self.desired.lock().get(&thread_id).copied()
    }

    /// Consistent copy of all three maps
    ///
    /// All three mutexes are held (in the global order) for the duration of
    /// the copy only; graph building happens afterwards on the owned copy.
    pub fn snapshot(&self) -> Snapshot {
        let owner = self.owner.lock();
        let desired = self.desired.lock();
        let stack = self.stack.lock();
        Snapshot {
            desired: desired.clone(),
            owner: owner.owner.clone(),
            stack: stack.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_acquire_moves_thread_from_desired_to_owner() {
        let store = LockStateStore::new();
        store.before_acquire(1, 10, "stack".into()).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.desired.get(&1), Some(&10));
        assert_eq!(snap.stack.get(&1).map(String::as_str), Some("stack"));
        assert!(snap.owner.is_empty());

        assert_eq!(store.after_acquire(1, 10), None);
        let snap = store.snapshot();
        assert!(snap.desired.is_empty());
        assert!(snap.stack.is_empty());
        assert_eq!(snap.owner.get(&10), Some(&1));

        assert_eq!(store.after_release(1, 10), Ok(Release::Cleared));
        assert!(store.snapshot().owner.is_empty());
    }

    #[test]
    fn test_foreign_release_is_rejected() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);

        let err = store.after_release(2, 10).unwrap_err();
        assert_eq!(
            err,
            UsageError::ForeignRelease {
                thread_id: 2,
                lock_id: 10,
                owner: 1
            }
        );
        assert_eq!(store.owner_of(10), Some(1));

        let err = store.after_release(2, 11).unwrap_err();
        assert_eq!(
            err,
            UsageError::NotHeld {
                thread_id: 2,
                lock_id: 11
            }
        );
    }

    #[test]
    fn test_reacquire_is_recorded_and_reported() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);
        let err = store.before_acquire(1, 10, String::new()).unwrap_err();
        assert_eq!(
            err,
            UsageError::Reacquire {
                thread_id: 1,
                lock_id: 10
            }
        );
        assert_eq!(store.desired_by(1), Some(10));
    }

    #[test]
    fn test_acquire_failed_clears_request() {
        let store = LockStateStore::new();
        store.before_acquire(3, 30, "s".into()).unwrap();
        store.acquire_failed(3);
        let snap = store.snapshot();
        assert!(snap.desired.is_empty());
        assert!(snap.stack.is_empty());
    }

    #[test]
    fn test_takeover_before_release_is_a_handoff() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);

        // Thread 2 got the real lock before thread 1 reported its unlock
        assert_eq!(store.after_acquire(2, 10), Some(1));
        assert_eq!(store.owner_of(10), Some(2));
        assert_eq!(store.pending_handoffs(), 1);

        assert_eq!(store.after_release(1, 10), Ok(Release::HandedOff));
        assert_eq!(store.owner_of(10), Some(2));
        assert_eq!(store.pending_handoffs(), 0);

        // A second stray release from thread 1 is misuse again
        assert!(matches!(
            store.after_release(1, 10),
            Err(UsageError::ForeignRelease { owner: 2, .. })
        ));
        assert_eq!(store.after_release(2, 10), Ok(Release::Cleared));
    }

    #[test]
    fn test_late_release_after_new_owner_finished() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);
        store.after_acquire(2, 10);
        assert_eq!(store.after_release(2, 10), Ok(Release::Cleared));
        assert_eq!(store.after_release(1, 10), Ok(Release::HandedOff));
        assert_eq!(store.owner_of(10), None);
    }

    #[test]
    fn test_forget_lock_drops_pending_handoffs() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);
        store.after_acquire(2, 10);
        assert_eq!(store.forget_lock(10), Some(2));
        assert_eq!(store.pending_handoffs(), 0);
    }

    #[test]
    fn test_forget_lock() {
        let store = LockStateStore::new();
        store.after_acquire(1, 10);
        assert_eq!(store.forget_lock(10), Some(1));
        assert_eq!(store.forget_lock(10), None);
    }

    #[test]
    fn test_snapshot_never_sees_half_applied_acquire() {
        let store = Arc::new(LockStateStore::new());
        let stop = Arc::new(AtomicBool::new(false));

        let mut writers = vec![];
        for tid in 1..=4usize {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            writers.push(thread::spawn(move || {
                let lock_id = 100 + tid;
                while !stop.load(Ordering::Relaxed) {
                    store.before_acquire(tid, lock_id, String::new()).unwrap();
                    assert_eq!(store.after_acquire(tid, lock_id), None);
                    store.after_release(tid, lock_id).unwrap();
                }
            }));
        }

        for _ in 0..2_000 {
            let snap = store.snapshot();
            for (tid, lock_id) in &snap.desired {
                assert_ne!(snap.owner.get(lock_id), Some(tid));
                assert!(snap.stack.contains_key(tid));
            }
            assert_eq!(snap.desired.len(), snap.stack.len());
        }

        stop.store(true, Ordering::Relaxed);
        for w in writers {
            w.join().unwrap();
        }
    }
}
