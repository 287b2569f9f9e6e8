//! Human-readable build output.
//!
//! Everything a user should see in the build log (image preparation,
//! network/volume inspection, cleanup failures, streamed container lines)
//! goes through an [`OutputSink`]. Structured diagnostics go to `tracing`
//! instead.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Line-oriented destination for build output.
pub trait OutputSink: Send + Sync {
    /// Writes one line (without trailing newline).
    fn write_line(&self, line: &str);
}

/// Writes lines to the process's stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // stdout going away is not a build failure
        let _ = writeln!(out, "{line}");
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.contains(needle))
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Prefix for a step's lines: `[step: name]` or `[stage: s][step: name]`.
pub fn step_prefix(stage: Option<&str>, step: &str) -> String {
    match stage {
        Some(stage) => format!("[stage: {stage}][step: {step}]"),
        None => format!("[step: {step}]"),
    }
}

/// Prefix for a service's lines.
pub fn service_prefix(service: &str) -> String {
    format!("[service: {service}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(step_prefix(None, "clone"), "[step: clone]");
        assert_eq!(step_prefix(Some("build"), "test"), "[stage: build][step: test]");
        assert_eq!(service_prefix("postgres"), "[service: postgres]");
    }

    #[test]
    fn test_memory_sink_matching() {
        let sink = MemorySink::new();
        sink.write_line("[step: init] $ docker network inspect");
        sink.write_line("[step: clone] hello");
        assert_eq!(sink.matching("network").len(), 1);
        assert_eq!(sink.lines().len(), 2);
    }
}
