//! Logging functionality for Lockwatch
//!
//! Diagnostics go through `tracing`; deadlock reports can additionally be
//! appended to a JSON-lines file.

mod event_logger;

pub use event_logger::JsonFileSink;

use tracing_subscriber::EnvFilter;

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `info`)
///
/// Does nothing if the application already installed a global subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
