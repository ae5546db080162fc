//! Call-stack capture for threads that start waiting on a lock
//!
//! The detector only needs "where was this thread when it blocked"; the
//! [`StackCapturer`] trait keeps the unwinding machinery swappable so tests
//! can inject fixed stacks and production code can use the `backtrace` crate.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Text stored for a waiting thread when stack capture is turned off
pub const STACK_DISABLED: &str = "<stack capture disabled>";

/// One resolved frame of a captured stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Source file, if debug info was available
    pub file: Option<String>,
    /// Demangled function name, if the symbol resolved
    pub function: Option<String>,
    /// Source line, if debug info was available
    pub line: Option<u32>,
}

/// Produces the calling thread's current stack
pub trait StackCapturer: Send + Sync {
    /// Capture the stack of the calling thread, innermost frame first,
    /// keeping at most `max_frames` frames
    fn capture_stack(&self, max_frames: usize) -> Result<Vec<StackFrame>>;
}

/// Path fragments of frames that belong to the capture machinery itself
const INTERNAL_FRAMES: &[&str] = &[
    "backtrace::",
    "lockwatch::core::stack::",
    "lockwatch::core::store::",
    "lockwatch::core::detector::",
    "lockwatch::core::locks::",
];

/// [`StackCapturer`] backed by the `backtrace` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceCapturer;

impl StackCapturer for BacktraceCapturer {
    fn capture_stack(&self, max_frames: usize) -> Result<Vec<StackFrame>> {
        let mut raw = Vec::new();
        backtrace::trace(|frame| {
            raw.push(frame.clone());
            // Leave headroom for the internal frames stripped below
            raw.len() < max_frames + INTERNAL_FRAMES.len() * 4
        });

        if raw.is_empty() {
            bail!("unwinder returned an empty backtrace");
        }

        let mut frames = Vec::with_capacity(raw.len());
        for frame in &raw {
            let mut resolved = false;
            backtrace::resolve_frame(frame, |symbol| {
                resolved = true;
                frames.push(StackFrame {
                    file: symbol.filename().map(|p| p.display().to_string()),
                    function: symbol.name().map(|n| format!("{:#}", n)),
                    line: symbol.lineno(),
                });
            });
            if !resolved {
                frames.push(StackFrame {
                    file: None,
                    function: None,
                    line: None,
                });
            }
        }

        // Drop leading frames that are the detector looking at itself
        let skip = frames
            .iter()
            .take_while(|f| {
                f.function
                    .as_deref()
                    .is_some_and(|name| INTERNAL_FRAMES.iter().any(|p| name.contains(p)))
            })
            .count();
        frames.drain(..skip);
        frames.truncate(max_frames);

        if frames.is_empty() {
            bail!("no frames left after removing detector internals");
        }
        Ok(frames)
    }
}

/// Render frames as `#i  file  function  line`, one per line
pub fn format_stack(frames: &[StackFrame]) -> String {
    let mut out = String::new();
    for (i, frame) in frames.iter().enumerate() {
        let _ = writeln!(
            out,
            "#{}  {}  {}  {}",
            i,
            frame.file.as_deref().unwrap_or("??"),
            frame.function.as_deref().unwrap_or("??"),
            frame.line.map(|l| l.to_string()).unwrap_or_else(|| "?".into()),
        );
    }
    out
}
