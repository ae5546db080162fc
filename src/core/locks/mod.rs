pub mod mutex;

use crate::core::types::LockId;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

/// Issue a fresh lock ID; IDs are never reused and `0` is never issued
pub fn next_lock_id() -> LockId {
    NEXT_LOCK_ID.fetch_add(1, Ordering::SeqCst)
}
