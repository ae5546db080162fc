use crate::core::detector::global_detector;
use crate::core::locks::next_lock_id;
use crate::core::types::{LockId, get_current_thread_id};
use parking_lot::RawMutex;
use parking_lot::lock_api::RawMutex as _;
use std::ffi::c_void;
use std::os::raw::c_int;

/// Mutex handed out to C code
///
/// C unlocks from a different call frame than it locks, so there is no guard
/// to hold on to: the raw lock is driven directly and ownership is checked
/// against the detector's store.
struct FfiMutex {
    id: LockId,
    raw: RawMutex,
}

/// Create a new tracked mutex.
///
/// # Returns
/// * Void pointer to the mutex
///
/// # Safety
/// - The returned pointer must be freed by `lockwatch_destroy_mutex`.
/// - Any usage from C must ensure not to free or move the returned pointer by other means.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_create_mutex() -> *mut c_void {
    let mutex = Box::new(FfiMutex {
        id: next_lock_id(),
        raw: RawMutex::INIT,
    });
    Box::into_raw(mutex) as *mut c_void
}

/// Destroy a tracked mutex.
///
/// Frees the mutex and removes it from the detector's tracking.
///
/// # Arguments
/// * `mutex` - Pointer to a mutex created with `lockwatch_create_mutex`.
///
/// # Safety
/// - The caller must ensure that `mutex` is not used by any thread after this function is called.
/// - The pointer must be one previously obtained from `lockwatch_create_mutex`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_destroy_mutex(mutex: *mut c_void) {
    if mutex.is_null() {
        return;
    }
    let mutex = unsafe { Box::from_raw(mutex as *mut FfiMutex) };
    global_detector().forget_lock(mutex.id);
}

/// Get the lock ID the detector uses for a mutex.
///
/// # Returns
/// * The lock ID, or 0 if the mutex is NULL
///
/// # Safety
/// The caller must pass a valid pointer from `lockwatch_create_mutex` or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_mutex_id(mutex: *mut c_void) -> LockId {
    if mutex.is_null() {
        return 0;
    }
    unsafe { &*(mutex as *const FfiMutex) }.id
}

/// Lock a tracked mutex, blocking until it is available.
///
/// # Arguments
/// * `mutex` - Pointer to a mutex created with `lockwatch_create_mutex`.
///
/// # Returns
/// * `0` on success
/// * `-1` if the mutex pointer is NULL
///
/// # Safety
/// - The caller must pass a valid pointer from `lockwatch_create_mutex`.
/// - Locking a mutex the calling thread already holds blocks forever; the
///   monitor reports it as a self-wait.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_lock_mutex(mutex: *mut c_void) -> c_int {
    if mutex.is_null() {
        return -1;
    }
    let mutex = unsafe { &*(mutex as *const FfiMutex) };
    let detector = global_detector();
    let thread_id = get_current_thread_id();

    detector.before_acquire(thread_id, mutex.id);
    mutex.raw.lock();
    detector.after_acquire(thread_id, mutex.id);
    0
}

/// Try to lock a tracked mutex without blocking.
///
/// # Returns
/// * `0` if the lock was acquired
/// * `1` if the mutex is held by another thread
/// * `-1` if the mutex pointer is NULL
///
/// # Safety
/// The caller must pass a valid pointer from `lockwatch_create_mutex`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_trylock_mutex(mutex: *mut c_void) -> c_int {
    if mutex.is_null() {
        return -1;
    }
    let mutex = unsafe { &*(mutex as *const FfiMutex) };
    if !mutex.raw.try_lock() {
        return 1;
    }
    global_detector().after_acquire(get_current_thread_id(), mutex.id);
    0
}

/// Unlock a tracked mutex.
///
/// # Returns
/// * `0` on success
/// * `-1` if the mutex pointer is NULL
/// * `-2` if the calling thread does not hold the mutex; nothing is unlocked
///
/// # Safety
/// The caller must pass a valid pointer from `lockwatch_create_mutex`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockwatch_unlock_mutex(mutex: *mut c_void) -> c_int {
    if mutex.is_null() {
        return -1;
    }
    let mutex = unsafe { &*(mutex as *const FfiMutex) };
    let detector = global_detector();
    let thread_id = get_current_thread_id();

    match detector.store().owner_of(mutex.id) {
        Some(owner) if owner == thread_id => {
            // SAFETY: the store records this thread as the holder of the raw lock
            unsafe { mutex.raw.unlock() };
            detector.after_release(thread_id, mutex.id);
            0
        }
        owner => {
            tracing::warn!(
                thread_id,
                lock_id = mutex.id,
                owner = ?owner,
                "Refusing to unlock a mutex held by another thread"
            );
            -2
        }
    }
}
