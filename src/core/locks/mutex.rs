use crate::core::detector::{Detector, global_detector};
use crate::core::locks::next_lock_id;
use crate::core::types::{LockId, ThreadId, get_current_thread_id};
use parking_lot::{Mutex as ParkingLotMutex, MutexGuard as ParkingLotMutexGuard};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A wrapper around a mutex that reports lock operations for deadlock detection
///
/// The Mutex provides the same interface as a `parking_lot` mutex but brackets
/// every blocking acquire with `before_acquire`/`after_acquire` and every
/// release with `after_release` on its detector.
///
/// # Example
///
/// ```rust
/// use lockwatch::Mutex;
/// use std::sync::Arc;
///
/// let counter = Arc::new(Mutex::new(0u32));
/// let workers: Vec<_> = (0..4)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         std::thread::spawn(move || *counter.lock() += 1)
///     })
///     .collect();
/// for w in workers {
///     w.join().unwrap();
/// }
/// assert_eq!(*counter.lock(), 4);
/// ```
pub struct Mutex<T> {
    /// Issued by `next_lock_id`, never reused
    id: LockId,
    /// Detector this mutex reports to
    detector: Arc<Detector>,
    /// The wrapped mutex
    inner: ParkingLotMutex<T>,
}

/// Guard for a Mutex, reports lock release when dropped
///
/// The real lock is released first and only then is the release reported,
/// so the detector never records a lock as free while it is still held.
pub struct MutexGuard<'a, T> {
    /// Thread that owns this guard
    thread_id: ThreadId,
    /// Mutex this guard belongs to
    mutex: &'a Mutex<T>,
    /// The inner parking_lot guard, dropped by hand in `Drop`
    guard: ManuallyDrop<ParkingLotMutexGuard<'a, T>>,
}

impl<T> Mutex<T> {
    /// Create a new Mutex reporting to the global detector
    ///
    /// # Example
    ///
    /// ```rust
    /// use lockwatch::Mutex;
    ///
    /// let mutex = Mutex::new(42);
    /// ```
    pub fn new(value: T) -> Self {
        Self::with_detector(value, global_detector())
    }

    /// Create a new Mutex reporting to `detector`
    pub fn with_detector(value: T, detector: Arc<Detector>) -> Self {
        Mutex {
            id: next_lock_id(),
            detector,
            inner: ParkingLotMutex::new(value),
        }
    }

    /// Get the ID of this mutex
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Acquire the lock, blocking until it is available
    ///
    /// The attempt is recorded before blocking, so if this call never returns
    /// the monitor can see who this thread is waiting for.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lockwatch::Mutex;
    ///
    /// let mutex = Mutex::new(42);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 42);
    /// drop(guard); // released here, then reported
    /// ```
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let thread_id = get_current_thread_id();

        self.detector.before_acquire(thread_id, self.id);
        let guard = self.inner.lock();
        self.detector.after_acquire(thread_id, self.id);

        MutexGuard {
            thread_id,
            mutex: self,
            guard: ManuallyDrop::new(guard),
        }
    }

    /// Try to acquire the lock without blocking
    ///
    /// A failed attempt never waits, so only a successful one is reported.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lockwatch::Mutex;
    ///
    /// let mutex = Mutex::new(42);
    /// let guard = mutex.try_lock().expect("uncontended");
    /// assert!(mutex.try_lock().is_none());
    /// drop(guard);
    /// ```
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let thread_id = get_current_thread_id();

        let guard = self.inner.try_lock()?;
        self.detector.after_acquire(thread_id, self.id);

        Some(MutexGuard {
            thread_id,
            mutex: self,
            guard: ManuallyDrop::new(guard),
        })
    }

    /// Consumes this mutex, returning the underlying data
    pub fn into_inner(self) -> T {
        self.detector.forget_lock(self.id);

        let mutex = ManuallyDrop::new(self);
        // SAFETY: `mutex` is never used or dropped again after these reads,
        // so each field is moved out exactly once.
        let detector = unsafe { std::ptr::read(&mutex.detector) };
        drop(detector);
        unsafe { std::ptr::read(&mutex.inner) }.into_inner()
    }

    /// Returns a mutable reference to the underlying data
    ///
    /// Since this call borrows the Mutex mutably, no actual locking needs to
    /// take place and nothing is reported.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        self.detector.forget_lock(self.id);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> MutexGuard<'_, T> {
    /// Get the lock ID associated with this guard
    pub fn lock_id(&self) -> LockId {
        self.mutex.id
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, and never touched again
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.mutex
            .detector
            .after_release(self.thread_id, self.mutex.id);
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(T::default())
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Mutex::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DetectorConfig;
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    fn detector() -> Arc<Detector> {
        let config = DetectorConfig {
            capture_stacks: false,
            ..DetectorConfig::default()
        };
        Arc::new(Detector::new(&config))
    }

    #[test]
    fn test_lock_and_release_update_owner() {
        let d = detector();
        let m = Mutex::with_detector(5, Arc::clone(&d));
        {
            let mut g = m.lock();
            *g += 1;
            assert_eq!(d.store().owner_of(m.id()), Some(get_current_thread_id()));
            assert_eq!(g.lock_id(), m.id());
        }
        assert_eq!(d.store().owner_of(m.id()), None);
        assert_eq!(*m.lock(), 6);
    }

    #[test]
    fn test_try_lock_failure_leaves_no_request() {
        let d = detector();
        let m = Arc::new(Mutex::with_detector((), Arc::clone(&d)));
        let _held = m.lock();

        let m2 = Arc::clone(&m);
        let tid = thread::spawn(move || {
            assert!(m2.try_lock().is_none());
            get_current_thread_id()
        })
        .join()
        .unwrap();

        assert_eq!(d.store().desired_by(tid), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let d = detector();
        let a = Mutex::with_detector(0, Arc::clone(&d));
        let b = Mutex::with_detector(0, Arc::clone(&d));
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), 0);
    }

    #[test]
    fn test_into_inner_forgets_lock() {
        let d = detector();
        let m = Mutex::with_detector(String::from("x"), Arc::clone(&d));
        let id = m.id();
        std::mem::forget(m.lock());
        assert_eq!(d.store().owner_of(id), Some(get_current_thread_id()));
        assert_eq!(m.into_inner(), "x");
        assert_eq!(d.store().owner_of(id), None);
    }

    #[test]
    fn test_contended_lock_reports_no_usage_errors() {
        let d = detector();
        let m = Arc::new(Mutex::with_detector(0u64, Arc::clone(&d)));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(*m.lock(), 160_000);
        assert_eq!(d.usage_errors(), 0);
        assert_eq!(d.store().pending_handoffs(), 0);
        assert_eq!(d.store().owner_of(m.id()), None);
    }

    #[test]
    fn test_blocked_thread_is_visible_while_waiting() {
        let d = detector();
        let m = Arc::new(Mutex::with_detector(0u32, Arc::clone(&d)));
        let barrier = Arc::new(Barrier::new(2));

        let guard = m.lock();
        let (m2, b2) = (Arc::clone(&m), Arc::clone(&barrier));
        let waiter = thread::spawn(move || {
            let tid = get_current_thread_id();
            b2.wait();
            *m2.lock() += 1;
            tid
        });
        barrier.wait();

        let deadline = Instant::now() + Duration::from_secs(5);
        while d.snapshot().desired.is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        let snap = d.snapshot();
        let (&tid, &lock_id) = snap.desired.iter().next().unwrap();
        assert_eq!(lock_id, m.id());
        assert_eq!(snap.owner[&lock_id], get_current_thread_id());

        drop(guard);
        assert_eq!(waiter.join().unwrap(), tid);
        assert!(d.snapshot().desired.is_empty());
        assert_eq!(*m.lock(), 1);
    }
}
