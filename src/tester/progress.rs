//! Hierarchical progress reporting.
//!
//! Level 1 is the whole run, level 2 a URI within an IP-version pass,
//! level 3 the steps of one URI test. Each event says "step `current` of
//! `max` at this level".

use std::io::Write;

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub level: u32,
    pub current: u32,
    pub max: u32,
    pub message: String,
}

/// Receives progress notifications from a test run.
pub trait ProgressSink {
    fn on_progress(&mut self, level: u32, current: u32, max: u32, message: &str);
}

/// Records every event, for callers that render progress later.
impl ProgressSink for Vec<ProgressEvent> {
    fn on_progress(&mut self, level: u32, current: u32, max: u32, message: &str) {
        self.push(ProgressEvent {
            level,
            current,
            max,
            message: message.to_string(),
        });
    }
}

/// Ignores progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _: u32, _: u32, _: u32, _: &str) {}
}

/// Prints indented progress lines to stderr.
pub struct ConsoleProgress<W: Write> {
    out: W,
}

impl ConsoleProgress<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

/// `• • [1/3] message` for a level-2 event.
pub fn format_progress(level: u32, current: u32, max: u32, message: &str) -> String {
    format!(
        "{}[{}/{}] {}",
        "• ".repeat(level as usize),
        current,
        max,
        message
    )
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn on_progress(&mut self, level: u32, current: u32, max: u32, message: &str) {
        tracing::debug!(level, current, max, "{}", message);
        // Progress output is best effort; a closed stderr must not fail the run.
        let _ = writeln!(self.out, "{}", format_progress(level, current, max, message));
    }
}
