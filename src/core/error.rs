//! Error types for detector misuse and configuration
//!
//! None of these ever reach instrumented application code: the detector
//! logs them and carries on.

use crate::core::types::{LockId, ThreadId};
use thiserror::Error;

/// Inconsistent lock usage reported by the instrumented program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A thread asked for a lock it already holds
    #[error("thread {thread_id} is acquiring lock {lock_id} which it already holds")]
    Reacquire { thread_id: ThreadId, lock_id: LockId },

    /// A thread released a lock owned by another thread
    #[error("thread {thread_id} released lock {lock_id} owned by thread {owner}")]
    ForeignRelease {
        thread_id: ThreadId,
        lock_id: LockId,
        owner: ThreadId,
    },

    /// A thread released a lock nobody is recorded as holding
    #[error("thread {thread_id} released lock {lock_id} which is not held")]
    NotHeld { thread_id: ThreadId, lock_id: LockId },
}

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// The check interval must be non-zero
    #[error("check interval must be greater than zero")]
    ZeroInterval,

    /// At least one frame must be kept per captured stack
    #[error("max_frames must be greater than zero; disable stack capture instead")]
    ZeroMaxFrames,
}
