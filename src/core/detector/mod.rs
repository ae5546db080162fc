pub mod deadlock_handling;
pub mod monitor;

use crate::core::config::DetectorConfig;
use crate::core::error::UsageError;
use crate::core::report::ReportSink;
use crate::core::stack::{BacktraceCapturer, STACK_DISABLED, StackCapturer, format_stack};
use crate::core::store::{LockStateStore, Release, Snapshot};
use crate::core::types::{DeadlockInfo, LockId, ThreadId};
use anyhow::Result;
use monitor::MonitorHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Deadlock detector service
///
/// The Detector owns the Lock State Store and the instrumentation API that
/// feeds it. It does no background work by itself: a [`MonitorHandle`]
/// periodically calls [`Detector::check_deadlock`] and forwards what it finds.
///
/// # How it works
///
/// 1. Before a thread blocks on a lock, `before_acquire` records the request
///    and the thread's call stack
/// 2. Once the lock is obtained, `after_acquire` turns the request into
///    ownership in one atomic step
/// 3. After the lock is released, `after_release` clears the ownership
/// 4. A detection pass snapshots the store, builds the wait-for graph and
///    runs Kahn's reduction; leftover threads are deadlocked
///
/// Tests and embedders can build isolated instances; instrumented code that
/// does not name a detector uses the process-wide one.
pub struct Detector {
    store: LockStateStore,
    capturer: Box<dyn StackCapturer>,
    capture_stacks: AtomicBool,
    max_frames: AtomicUsize,
    usage_errors: AtomicU64,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}

impl Detector {
    /// Create a detector capturing stacks with the `backtrace` crate
    pub fn new(config: &DetectorConfig) -> Self {
        Self::with_capturer(config, BacktraceCapturer)
    }

    /// Create a detector with a custom stack capturer
    pub fn with_capturer<C>(config: &DetectorConfig, capturer: C) -> Self
    where
        C: StackCapturer + 'static,
    {
        Detector {
            store: LockStateStore::new(),
            capturer: Box::new(capturer),
            capture_stacks: AtomicBool::new(config.capture_stacks),
            max_frames: AtomicUsize::new(config.max_frames),
            usage_errors: AtomicU64::new(0),
        }
    }

    /// Apply the per-acquisition settings of `config`
    pub fn configure(&self, config: &DetectorConfig) {
        self.capture_stacks
            .store(config.capture_stacks, Ordering::Relaxed);
        self.max_frames.store(config.max_frames, Ordering::Relaxed);
    }

    /// Whether stacks are captured on blocking acquires
    pub fn captures_stacks(&self) -> bool {
        self.capture_stacks.load(Ordering::Relaxed) && self.max_frames.load(Ordering::Relaxed) > 0
    }

    /// Number of lock usage errors logged so far
    pub fn usage_errors(&self) -> u64 {
        self.usage_errors.load(Ordering::Relaxed)
    }

    fn usage_error(&self, thread_id: ThreadId, lock_id: LockId, error: UsageError) {
        self.usage_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(thread_id, lock_id, error = %error, "Lock usage error");
    }

    /// Register that `thread_id` is about to block on `lock_id`
    ///
    /// Captures the caller's stack (outside of any store lock) and records the
    /// request. Acquiring a lock the thread already holds is logged; the
    /// request is kept so the monitor reports the self-wait.
    pub fn before_acquire(&self, thread_id: ThreadId, lock_id: LockId) {
        let stack = self.stack_text(thread_id, lock_id);
        if let Err(e) = self.store.before_acquire(thread_id, lock_id, stack) {
            self.usage_error(thread_id, lock_id, e);
        }
        tracing::trace!(thread_id, lock_id, "lock attempt");
    }

    /// Register that `thread_id` obtained `lock_id`
    ///
    /// Must only be called once the underlying lock is actually held.
    pub fn after_acquire(&self, thread_id: ThreadId, lock_id: LockId) {
        match self.store.after_acquire(thread_id, lock_id) {
            Some(previous) => {
                tracing::trace!(thread_id, lock_id, previous, "lock acquired ahead of previous release")
            }
            None => tracing::trace!(thread_id, lock_id, "lock acquired"),
        }
    }

    /// Register that `thread_id` gave up acquiring the lock it was waiting on
    pub fn acquire_failed(&self, thread_id: ThreadId, lock_id: LockId) {
        self.store.acquire_failed(thread_id);
        tracing::trace!(thread_id, lock_id, "lock attempt abandoned");
    }

    /// Register that `thread_id` released `lock_id`
    ///
    /// Releasing a lock the thread does not own is logged and ignored. A
    /// release arriving after the next owner already recorded itself is
    /// expected under contention and only traced.
    pub fn after_release(&self, thread_id: ThreadId, lock_id: LockId) {
        match self.store.after_release(thread_id, lock_id) {
            Ok(Release::Cleared) => tracing::trace!(thread_id, lock_id, "lock released"),
            Ok(Release::HandedOff) => {
                tracing::trace!(thread_id, lock_id, "lock released after handoff")
            }
            Err(e) => self.usage_error(thread_id, lock_id, e),
        }
    }

    /// Register the destruction of `lock_id`
    pub fn forget_lock(&self, lock_id: LockId) {
        if let Some(owner) = self.store.forget_lock(lock_id) {
            tracing::warn!(lock_id, owner, "Lock destroyed while still recorded as held");
        }
    }

    /// Consistent copy of the store
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Direct access to the underlying store
    pub fn store(&self) -> &LockStateStore {
        &self.store
    }

    /// Run one detection pass over a fresh snapshot
    ///
    /// Returns `None` when no thread is stuck.
    pub fn check_deadlock(&self) -> Option<DeadlockInfo> {
        deadlock_handling::extract_deadlock_info(&self.snapshot())
    }

    fn stack_text(&self, thread_id: ThreadId, lock_id: LockId) -> String {
        if !self.captures_stacks() {
            return STACK_DISABLED.to_string();
        }
        let max_frames = self.max_frames.load(Ordering::Relaxed);
        match self.capturer.capture_stack(max_frames) {
            Ok(frames) => format_stack(&frames),
            Err(e) => {
                tracing::warn!(thread_id, lock_id, error = %e, "Stack capture failed");
                format!("<stack capture failed: {}>", e)
            }
        }
    }
}

// Global detector instance, created on first use
lazy_static::lazy_static! {
    static ref GLOBAL_DETECTOR: Arc<Detector> = {
        let config = DetectorConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring invalid detector environment configuration");
            DetectorConfig::default()
        });
        Arc::new(Detector::new(&config))
    };
}

/// Monitor of the global detector, if one is running
static GLOBAL_MONITOR: Mutex<Option<MonitorHandle>> = Mutex::new(None);

/// The process-wide detector used by [`Mutex::new`](crate::Mutex::new)
pub fn global_detector() -> Arc<Detector> {
    Arc::clone(&GLOBAL_DETECTOR)
}

/// Configure the global detector and (re)start its monitor loop
///
/// A monitor started by an earlier call is shut down first.
///
/// # Errors
/// Returns an error if the configuration is invalid or the monitor thread
/// could not be spawned
pub fn init_detector(config: &DetectorConfig, sink: Arc<dyn ReportSink>) -> Result<()> {
    config.validate()?;

    let detector = global_detector();
    detector.configure(config);

    // Join the old monitor outside the slot lock: its sink may call back in
    let previous = GLOBAL_MONITOR.lock().take();
    if let Some(previous) = previous {
        previous.shutdown();
    }

    let handle = MonitorHandle::spawn(detector, sink, config.check_interval)?;
    let replaced = GLOBAL_MONITOR.lock().replace(handle);
    if let Some(replaced) = replaced {
        replaced.shutdown();
    }
    Ok(())
}

/// Stop the global monitor loop, if running
///
/// Returns `true` if a monitor was stopped. The global detector keeps
/// tracking locks; only the periodic checks stop.
pub fn shutdown_detector() -> bool {
    let handle = GLOBAL_MONITOR.lock().take();
    match handle {
        Some(handle) => {
            handle.shutdown();
            true
        }
        None => false,
    }
}

/// Register a lock attempt with the global detector
pub fn before_acquire(thread_id: ThreadId, lock_id: LockId) {
    GLOBAL_DETECTOR.before_acquire(thread_id, lock_id);
}

/// Register a lock acquisition with the global detector
pub fn after_acquire(thread_id: ThreadId, lock_id: LockId) {
    GLOBAL_DETECTOR.after_acquire(thread_id, lock_id);
}

/// Register an abandoned lock attempt with the global detector
pub fn acquire_failed(thread_id: ThreadId, lock_id: LockId) {
    GLOBAL_DETECTOR.acquire_failed(thread_id, lock_id);
}

/// Register a lock release with the global detector
pub fn after_release(thread_id: ThreadId, lock_id: LockId) {
    GLOBAL_DETECTOR.after_release(thread_id, lock_id);
}

/// Run one detection pass on the global detector
pub fn check_deadlock() -> Option<DeadlockInfo> {
    GLOBAL_DETECTOR.check_deadlock()
}
