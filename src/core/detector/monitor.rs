//! Background monitor loop
//!
//! The monitor alternates between two states: idle (waiting out the check
//! interval) and checking (snapshot, graph, reduction, report). Every check
//! returns to idle whatever its outcome. The idle wait is a receive on a stop
//! channel, so shutdown does not have to wait for the interval to expire.

use crate::core::detector::Detector;
use crate::core::report::{ReportSink, deliver};
use crate::core::types::DeadlockInfo;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Name of the monitor thread
pub const MONITOR_THREAD_NAME: &str = "lockwatch-monitor";

/// Counters shared between the monitor thread and its handle
#[derive(Default)]
struct MonitorStats {
    passes: AtomicU64,
    reports: AtomicU64,
}

/// Handle to a running monitor loop
///
/// Dropping the handle stops the loop and joins the thread.
pub struct MonitorHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<MonitorStats>,
}

impl MonitorHandle {
    /// Start a monitor checking `detector` every `interval`
    ///
    /// # Errors
    /// Returns an error if the monitor thread could not be spawned
    pub fn spawn(
        detector: Arc<Detector>,
        sink: Arc<dyn ReportSink>,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let stats = Arc::new(MonitorStats::default());
        let thread_stats = Arc::clone(&stats);

        let thread = thread::Builder::new()
            .name(MONITOR_THREAD_NAME.to_string())
            .spawn(move || run(detector, sink, interval, stop_rx, thread_stats))
            .context("Failed to spawn deadlock monitor thread")?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Deadlock monitor started");

        Ok(MonitorHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
            stats,
        })
    }

    /// Number of completed detection passes
    pub fn passes(&self) -> u64 {
        self.stats.passes.load(Ordering::SeqCst)
    }

    /// Number of deadlock reports handed to the sink
    pub fn reports(&self) -> u64 {
        self.stats.reports.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for the monitor thread to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            // A full channel means a stop is already pending
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            // A sink running on the monitor thread may drop the handle
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("Deadlock monitor thread panicked");
            }
            tracing::debug!("Deadlock monitor stopped");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(
    detector: Arc<Detector>,
    sink: Arc<dyn ReportSink>,
    interval: Duration,
    stop: Receiver<()>,
    stats: Arc<MonitorStats>,
) {
    // Last reported deadlock, to avoid repeating it every interval
    let mut last: Option<DeadlockInfo> = None;

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        match catch_unwind(AssertUnwindSafe(|| detector.check_deadlock())) {
            Ok(Some(info)) => {
                if last.as_ref().is_some_and(|prev| prev.same_deadlock(&info)) {
                    tracing::debug!(threads = ?info.thread_cycle, "Deadlock still present");
                } else if deliver(sink.as_ref(), &info) {
                    stats.reports.fetch_add(1, Ordering::SeqCst);
                    last = Some(info);
                }
            }
            Ok(None) => {
                if last.take().is_some() {
                    tracing::info!("Previously reported deadlock is gone");
                }
            }
            Err(_) => {
                tracing::error!("Deadlock detection pass panicked; retrying next interval");
            }
        }

        stats.passes.fetch_add(1, Ordering::SeqCst);
    }
}
