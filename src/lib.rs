//! # Lockwatch
//!
//! A runtime deadlock detector for mutex-based multithreaded programs.
//!
//! Lockwatch records, for every instrumented lock operation, which thread
//! wants which lock and which thread owns which lock. A background monitor
//! periodically turns that state into a wait-for graph and reports every
//! cycle it finds, together with the call stack at which each involved
//! thread blocked.
//!
//! ## Features
//!
//! - Periodic deadlock detection over consistent snapshots
//! - Drop-in instrumented [`Mutex`] for Rust code
//! - Explicit `before_acquire` / `after_acquire` / `after_release` API for
//!   other interception layers, including a C API in [`ffi`]
//! - Pluggable report sinks (tracing, JSON-lines file, callbacks)
//!
//! ## Example
//!
//! ```rust,no_run
//! use lockwatch::{Lockwatch, Mutex};
//! use std::time::Duration;
//!
//! Lockwatch::new()
//!     .interval(Duration::from_secs(1))
//!     .callback(|info| eprintln!("{}", info))
//!     .start()
//!     .expect("failed to start lockwatch");
//!
//! let m = Mutex::new(0);
//! *m.lock() += 1;
//! lockwatch::shutdown();
//! ```

mod core;
pub use core::{
    Detector, Lockwatch, Mutex, MutexGuard, after_acquire, after_release, before_acquire,
    check_deadlock, global_detector, init_tracing, shutdown,
    config::DetectorConfig,
    detector::monitor::MonitorHandle,
    detector::{acquire_failed, deadlock_handling::extract_deadlock_info},
    error::{ConfigError, UsageError},
    graph::{WaitEdge, WaitForGraph, extract_cycles, find_deadlocked},
    logger::JsonFileSink,
    report::{CallbackSink, FanoutSink, LogSink, ReportSink},
    stack::{BacktraceCapturer, StackCapturer, StackFrame, format_stack},
    store::{LockStateStore, Release, Snapshot},
    types::{BlockedThread, DeadlockInfo, LockId, ThreadId, get_current_thread_id},
};

pub mod ffi;
