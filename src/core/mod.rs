// Core types
pub mod types;
pub use types::*;

pub mod config;
pub mod error;

// Logging functionality
pub mod logger;
pub use logger::init_tracing;

// Graph implementation
pub mod graph;

pub mod report;
pub mod stack;
pub mod store;

// Deadlock detector
pub mod detector;
pub use detector::{
    Detector, after_acquire, after_release, before_acquire, check_deadlock, global_detector,
    init_detector, shutdown_detector,
};

// Instrumented locks
pub mod locks;
pub use locks::mutex::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use config::DetectorConfig;
use logger::JsonFileSink;
use report::{CallbackSink, FanoutSink, LogSink, ReportSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Lockwatch configuration struct
pub struct Lockwatch {
    config: DetectorConfig,
    log_path: Option<PathBuf>,
    callback: Option<Box<dyn Fn(DeadlockInfo) + Send + Sync + 'static>>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Default for Lockwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockwatch {
    /// Create a new Lockwatch with default settings
    ///
    /// By default:
    /// - The monitor checks every 10 seconds
    /// - Stacks are captured on every blocking acquire
    /// - Reports are written through `tracing` only
    pub fn new() -> Self {
        Lockwatch {
            config: DetectorConfig::default(),
            log_path: None,
            callback: None,
            sinks: Vec::new(),
        }
    }

    /// Replace the whole detector configuration
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the monitor check interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Enable or disable stack capture on blocking acquires
    pub fn capture_stacks(mut self, enabled: bool) -> Self {
        self.config.capture_stacks = enabled;
        self
    }

    /// Append every report as a JSON line to the file at `path`
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    pub fn with_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Set a custom callback to be invoked when a deadlock is detected
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Deliver reports to an additional sink
    pub fn sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Configure the global detector and start its monitor loop
    ///
    /// Calling `start` again reconfigures the detector and replaces the
    /// running monitor.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the report log cannot
    /// be opened, or the monitor thread cannot be spawned
    pub fn start(self) -> Result<()> {
        let mut fanout = FanoutSink::new().with(Arc::new(LogSink));

        if let Some(path) = self.log_path {
            let sink = JsonFileSink::with_file(&path).context("Failed to initialize report log")?;
            fanout = fanout.with(Arc::new(sink));
        }
        if let Some(callback) = self.callback {
            fanout = fanout.with(Arc::new(CallbackSink::new(callback)));
        }
        for sink in self.sinks {
            fanout = fanout.with(sink);
        }

        init_detector(&self.config, Arc::new(fanout)).context("Failed to start deadlock detector")?;

        tracing::info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            capture_stacks = self.config.capture_stacks,
            "Lockwatch started"
        );
        Ok(())
    }
}

/// Stop the global monitor loop
///
/// Returns `true` if a running monitor was stopped.
pub fn shutdown() -> bool {
    shutdown_detector()
}
