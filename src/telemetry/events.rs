//! Progress events emitted by long-running harness operations.
//!
//! Operations never print directly; they hand ticks and log lines to a
//! [`ProgressSink`]. The CLI uses [`TracingSink`], tests use
//! [`RecordingSink`].

use std::sync::OnceLock;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use parking_lot::Mutex;

/// Periodic "still working" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatTick {
    /// What is being waited on, e.g. a model spec.
    pub subject: String,
    /// 1-based tick number.
    pub sequence: u32,
    pub elapsed: Duration,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, tick: &HeartbeatTick);

    fn on_log(&self, line: &str);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_progress(&self, tick: &HeartbeatTick) {
        tracing::info!(
            subject = %tick.subject,
            tick = tick.sequence,
            elapsed_secs = tick.elapsed.as_secs(),
            "still working"
        );
    }

    fn on_log(&self, line: &str) {
        tracing::info!("{}", line);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _tick: &HeartbeatTick) {}

    fn on_log(&self, _line: &str) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    ticks: Mutex<Vec<HeartbeatTick>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> Vec<HeartbeatTick> {
        self.ticks.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn has_line_containing(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, tick: &HeartbeatTick) {
        self.ticks.lock().push(tick.clone());
    }

    fn on_log(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

const PROGRESS_KEYWORDS: &[&str] = &[
    "downloading",
    "downloaded",
    "converting",
    "converted",
    "installing",
    "installed",
    "extracting",
    "extracted",
    "loading",
    "loaded",
    "processing",
    "progress",
    "%",
    "complete",
    "success",
    "✓",
    "✅",
];

const ATTENTION_KEYWORDS: &[&str] = &["error", "warning", "failed"];

fn build_matcher(keywords: &[&str]) -> Option<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(keywords)
        .ok()
}

/// True for installer output lines worth surfacing as progress.
pub fn is_progress_line(line: &str) -> bool {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| build_matcher(PROGRESS_KEYWORDS))
        .as_ref()
        .is_some_and(|m| m.is_match(line))
}

/// True for stderr lines mentioning errors or warnings, in any case.
pub fn is_attention_line(line: &str) -> bool {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| build_matcher(ATTENTION_KEYWORDS))
        .as_ref()
        .is_some_and(|m| m.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_filter() {
        assert!(is_progress_line("Downloading model files..."));
        assert!(is_progress_line("  42% [=====>   ]"));
        assert!(is_progress_line("✅ done"));
        assert!(!is_progress_line("resolving manifest"));
    }

    #[test]
    fn test_attention_line_filter() {
        assert!(is_attention_line("WARNING: falling back"));
        assert!(is_attention_line("Conversion Failed"));
        assert!(!is_attention_line("all good"));
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.on_log("one");
        sink.on_progress(&HeartbeatTick {
            subject: "hf/x@1".into(),
            sequence: 1,
            elapsed: Duration::from_secs(3),
        });
        sink.on_log("two");
        assert_eq!(sink.lines(), vec!["one", "two"]);
        assert_eq!(sink.ticks().len(), 1);
        assert!(sink.has_line_containing("tw"));
    }
}
