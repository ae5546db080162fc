use crate::core::report::ReportSink;
use crate::core::types::DeadlockInfo;
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends each deadlock report to a file as one JSON line
///
/// Writes are serialized through a mutex and flushed immediately: a deadlocked
/// process is often killed right after the report, so nothing is buffered.
pub struct JsonFileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonFileSink {
    /// Open (or create) the report log at `path`
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The directory containing the log file could not be created
    /// - The log file could not be opened for appending
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_path = expand_timestamp(path.as_ref());

        // Create directory if needed
        if let Some(parent) = file_path.parent()
            && parent.to_string_lossy() != ""
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open log file {}", file_path.display()))?;

        Ok(JsonFileSink {
            path: file_path,
            file: Mutex::new(file),
        })
    }

    /// Path of the file reports are written to, after placeholder expansion
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn report(&self, info: &DeadlockInfo) -> Result<()> {
        let json = serde_json::to_string(info).context("Failed to serialize deadlock report")?;
        let mut file = self.file.lock();
        writeln!(file, "{}", json).context("Failed to write deadlock report")?;
        file.flush().context("Failed to flush deadlock report")?;
        Ok(())
    }
}

#[allow(clippy::literal_string_with_formatting_args)]
fn expand_timestamp(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.contains("{timestamp}") {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace("{timestamp}", &timestamp))
    } else {
        path.to_path_buf()
    }
}
