//! Deadlock report rendering and delivery
//!
//! A detection pass produces a [`DeadlockInfo`]; the monitor hands it to a
//! [`ReportSink`]. Delivery is best-effort: a failing or panicking sink is
//! logged and otherwise ignored.

use crate::core::types::{BlockedThread, DeadlockInfo};
use anyhow::{Result, bail};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Receives deadlock reports from the monitor
pub trait ReportSink: Send + Sync {
    /// Deliver one report
    fn report(&self, info: &DeadlockInfo) -> Result<()>;
}

/// Writes each report through `tracing` at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, info: &DeadlockInfo) -> Result<()> {
        tracing::error!(
            threads = ?info.thread_cycle,
            self_waits = info.self_waits.len(),
            "Found dead lock!\n{}",
            info
        );
        Ok(())
    }
}

/// Invokes a user closure for every report
pub struct CallbackSink {
    callback: Box<dyn Fn(DeadlockInfo) + Send + Sync>,
}

impl CallbackSink {
    /// Wrap `callback` as a sink
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        CallbackSink {
            callback: Box::new(callback),
        }
    }
}

impl ReportSink for CallbackSink {
    fn report(&self, info: &DeadlockInfo) -> Result<()> {
        (self.callback)(info.clone());
        Ok(())
    }
}

/// Forwards every report to several sinks
///
/// One sink failing does not keep the report from the others. The report
/// only counts as delivered if at least one sink accepted it.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to the fan-out
    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks reports are forwarded to
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// True when no sink is attached
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for FanoutSink {
    fn report(&self, info: &DeadlockInfo) -> Result<()> {
        let accepted = self
            .sinks
            .iter()
            .filter(|sink| deliver(sink.as_ref(), info))
            .count();
        if accepted == 0 {
            bail!("none of {} sinks accepted the report", self.sinks.len());
        }
        Ok(())
    }
}

/// Hand `info` to `sink`, containing errors and panics
///
/// Returns whether the sink accepted the report.
pub fn deliver(sink: &dyn ReportSink, info: &DeadlockInfo) -> bool {
    match catch_unwind(AssertUnwindSafe(|| sink.report(info))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to deliver deadlock report");
            false
        }
        Err(_) => {
            tracing::warn!("Deadlock report sink panicked");
            false
        }
    }
}

fn write_blocked(f: &mut fmt::Formatter<'_>, b: &BlockedThread) -> fmt::Result {
    writeln!(f, " thread_id {} apply lock_id {}", b.thread_id, b.waiting_for)?;
    for line in b.stack.lines() {
        writeln!(f, "    {}", line)?;
    }
    writeln!(f, " The lock {} is owned by {}", b.waiting_for, b.held_by)
}

impl fmt::Display for DeadlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deadlock detected at {}", self.timestamp)?;
        for cycle in &self.cycles {
            let chain: Vec<String> = cycle.iter().map(|t| t.to_string()).collect();
            writeln!(
                f,
                "cycle: {} -> {}",
                chain.join(" -> "),
                cycle.first().map(|t| t.to_string()).unwrap_or_default()
            )?;
        }
        for b in &self.blocked {
            write_blocked(f, b)?;
        }
        if !self.self_waits.is_empty() {
            writeln!(f, "threads waiting on a lock they already hold:")?;
            for b in &self.self_waits {
                write_blocked(f, b)?;
            }
        }
        Ok(())
    }
}
