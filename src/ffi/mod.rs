//! C API for Lockwatch
//!
//! Lets C and C++ programs feed the detector: either by calling the raw
//! instrumentation hooks around their own lock calls, or by using the
//! instrumented mutex in [`mutex`]. All hooks act on the calling thread and
//! the global detector.

pub mod mutex;

use crate::core::report::ReportSink;
use crate::core::{Lockwatch, detector, get_current_thread_id, locks};
use crate::{DeadlockInfo, LockId, ThreadId};
use anyhow::{Context, Result};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_ulong};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// C callback receiving a deadlock report as a JSON string
pub type DeadlockCallback = extern "C" fn(*const c_char);

// Globals to track initialization state
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static DEADLOCK_DETECTED: AtomicBool = AtomicBool::new(false);

// Callback given to the latest `lockwatch_init`
static DEADLOCK_CALLBACK: Mutex<Option<DeadlockCallback>> = Mutex::new(None);

/// Forwards reports to the C side: raises the detected flag and calls the
/// registered callback with the JSON-encoded report
struct FfiSink;

impl ReportSink for FfiSink {
    fn report(&self, info: &DeadlockInfo) -> Result<()> {
        DEADLOCK_DETECTED.store(true, Ordering::SeqCst);
        // Copy out so the callback runs without the slot locked
        let callback = *DEADLOCK_CALLBACK.lock();
        if let Some(cb) = callback {
            let json = serde_json::to_string(info).context("Failed to encode report")?;
            let c_str = CString::new(json).context("Report contains a NUL byte")?;
            cb(c_str.as_ptr());
        }
        Ok(())
    }
}

/// Initialize lockwatch and start the monitor loop.
///
/// # Arguments
/// * `interval_ms` - Monitor check interval in milliseconds, or 0 for the default (10 s).
/// * `capture_stacks` - Non-zero to capture a call stack on every blocking acquire.
/// * `log_path` - Path to a JSON-lines report file as a null-terminated C string, or NULL.
/// * `callback` - Function called with each deadlock report as JSON, or NULL.
///   Replaces the callback of any earlier initialization.
///
/// # Returns
/// * `0` on success
/// * `1` if lockwatch is already initialized
/// * `-1` if the log path contains invalid UTF-8
/// * `-2` if the detector failed to start
///
/// # Safety
/// The caller must ensure `log_path` is either `NULL` or a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_init(
    interval_ms: c_ulong,
    capture_stacks: c_int,
    log_path: *const c_char,
    callback: Option<DeadlockCallback>,
) -> c_int {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return 1; // Already initialized
    }

    let log_path = if log_path.is_null() {
        None
    } else {
        match unsafe { CStr::from_ptr(log_path) }.to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                INITIALIZED.store(false, Ordering::SeqCst);
                return -1; // Invalid UTF-8
            }
        }
    };

    *DEADLOCK_CALLBACK.lock() = callback;

    let mut builder = Lockwatch::new()
        .capture_stacks(capture_stacks != 0)
        .sink(Arc::new(FfiSink));
    if interval_ms > 0 {
        builder = builder.interval(Duration::from_millis(interval_ms as u64));
    }
    if let Some(path) = log_path {
        builder = builder.with_log(path);
    }

    match builder.start() {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "lockwatch_init failed");
            INITIALIZED.store(false, Ordering::SeqCst);
            -2
        }
    }
}

/// Stop the monitor loop.
///
/// # Returns
/// * `1` if a running monitor was stopped
/// * `0` if none was running
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_shutdown() -> c_int {
    let stopped = detector::shutdown_detector();
    INITIALIZED.store(false, Ordering::SeqCst);
    stopped as c_int
}

/// Get the lockwatch ID of the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_current_thread_id() -> ThreadId {
    get_current_thread_id()
}

/// Issue a fresh lock ID for a lock managed by the caller.
///
/// IDs are never reused, unlike lock addresses.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_new_lock_id() -> LockId {
    locks::next_lock_id()
}

/// Report that the calling thread is about to block on `lock_id`.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_before_acquire(lock_id: LockId) {
    detector::before_acquire(get_current_thread_id(), lock_id);
}

/// Report that the calling thread now holds `lock_id`.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_after_acquire(lock_id: LockId) {
    detector::after_acquire(get_current_thread_id(), lock_id);
}

/// Report that the calling thread stopped waiting for `lock_id` without getting it.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_acquire_failed(lock_id: LockId) {
    detector::acquire_failed(get_current_thread_id(), lock_id);
}

/// Report that the calling thread released `lock_id`.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_after_release(lock_id: LockId) {
    detector::after_release(get_current_thread_id(), lock_id);
}

/// Run one detection pass immediately.
///
/// The report, if any, is delivered to the registered callback.
///
/// # Returns
/// * `1` if a deadlock was found
/// * `0` otherwise
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_check_deadlock() -> c_int {
    match detector::check_deadlock() {
        Some(info) => {
            crate::core::report::deliver(&FfiSink, &info);
            1
        }
        None => 0,
    }
}

/// Check if a deadlock has been reported since initialization or the last reset.
///
/// # Returns
/// * `1` if a deadlock was detected
/// * `0` if no deadlock has been detected
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_is_deadlock_detected() -> c_int {
    DEADLOCK_DETECTED.load(Ordering::SeqCst) as c_int
}

/// Reset the deadlock detected flag.
#[unsafe(no_mangle)]
pub extern "C" fn lockwatch_reset_deadlock_flag() {
    DEADLOCK_DETECTED.store(false, Ordering::SeqCst);
}
