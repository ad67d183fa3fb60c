//! Incremental JSONL trace writer (§4.10).
//!
//! One file per query: a header line written immediately, a step line per
//! recorded event, and exactly one summary line on every exit path. Trace
//! persistence is diagnostic, not load-bearing — any I/O failure here is
//! logged and swallowed rather than surfaced to the caller's query result.
//! A query whose trace file couldn't even be opened still runs to
//! completion; it simply produces no trace.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use rlm_types::{TokenUsage, TraceHeader, TraceStatus, TraceStep, TraceSummary};
use serde::Serialize;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TraceLine {
    Header(TraceHeader),
    Step(TraceStep),
    Summary(TraceSummary),
}

enum Sink {
    File(File),
    Disabled,
}

/// Owns one trace file for the lifetime of a query. `finish()` writes the
/// terminal summary line; if a writer is dropped without `finish()` ever
/// having run (early return, panic, cancellation), `Drop` writes an
/// `interrupted` summary best-effort so every trace still ends with exactly
/// one summary line.
pub struct TraceWriter {
    sink: Sink,
    started_at: Instant,
    finished: bool,
}

impl TraceWriter {
    /// Open (creating if needed) the trace file at `path` and write the
    /// header line immediately. Never fails outwardly: an unopenable path
    /// degrades to a disabled writer rather than propagating an error.
    #[must_use]
    pub fn start(path: impl AsRef<Path>, header: TraceHeader) -> Self {
        let sink = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
        {
            Ok(file) => Sink::File(file),
            Err(error) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    %error,
                    "failed to open trace file; trace persistence disabled for this query"
                );
                Sink::Disabled
            }
        };
        let mut writer = Self {
            sink,
            started_at: Instant::now(),
            finished: false,
        };
        writer.write_line(&TraceLine::Header(header));
        writer
    }

    /// Append one step line. Per-step `tokens_used` is diagnostic only — the
    /// summary's totals come from the caller's own `TokenUsage` accumulator
    /// at `finish()`, since a step's token count (e.g. an outer-model call's
    /// prompt+completion total) doesn't decompose into the summary's
    /// separate prompt/completion fields, and subcall tokens are never
    /// attached to a step at all.
    pub fn write_step(&mut self, step: TraceStep) {
        self.write_line(&TraceLine::Step(step));
    }

    /// Write the terminal summary line and mark this writer finished so
    /// `Drop` does not write a second one.
    pub fn finish(mut self, status: TraceStatus, token_usage: TokenUsage) {
        self.write_summary(status, token_usage);
        self.finished = true;
    }

    fn write_summary(&mut self, status: TraceStatus, token_usage: TokenUsage) {
        let summary = TraceSummary {
            status,
            elapsed_ms: u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            prompt_tokens: token_usage.prompt_tokens,
            completion_tokens: token_usage.completion_tokens,
        };
        self.write_line(&TraceLine::Summary(summary));
    }

    fn write_line(&mut self, line: &TraceLine) {
        let Sink::File(file) = &mut self.sink else {
            return;
        };
        let mut bytes = match serde_json::to_vec(line) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "failed to encode trace line");
                return;
            }
        };
        bytes.push(b'\n');
        if let Err(error) = file.write_all(&bytes) {
            tracing::warn!(%error, "failed to write trace line");
        }
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.write_summary(TraceStatus::Interrupted, TokenUsage::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm_types::{TraceId, TraceStepType};
    use std::io::BufRead;

    fn header() -> TraceHeader {
        TraceHeader {
            trace_id: TraceId::new(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            question: "what does doc 0 say?".to_string(),
            document_refs: vec!["a.txt".to_string()],
            model: "claude-test".to_string(),
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::File::open(path)
            .map(|f| {
                std::io::BufReader::new(f)
                    .lines()
                    .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn writes_header_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let writer = TraceWriter::start(&path, header());
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "header");
        drop(writer);
    }

    #[test]
    fn finish_writes_exactly_one_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let mut writer = TraceWriter::start(&path, header());
        writer.write_step(TraceStep {
            step_type: TraceStepType::CodeGenerated,
            content: "print(1)".to_string(),
            iteration: 0,
            timestamp: 0.0,
            tokens_used: Some(10),
            duration_ms: Some(5),
        });
        writer.finish(TraceStatus::Success, TokenUsage { prompt_tokens: 7, completion_tokens: 3 });

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["type"], "step");
        assert_eq!(lines[2]["type"], "summary");
        assert_eq!(lines[2]["status"], "success");
        assert_eq!(lines[2]["prompt_tokens"], 7);
        assert_eq!(lines[2]["completion_tokens"], 3);
    }

    #[test]
    fn drop_without_finish_writes_interrupted_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        {
            let _writer = TraceWriter::start(&path, header());
        }
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["type"], "summary");
        assert_eq!(lines[1]["status"], "interrupted");
    }

    #[test]
    fn unopenable_path_degrades_silently_instead_of_panicking() {
        let path = Path::new("/nonexistent-dir-for-trace-test/trace.jsonl");
        let mut writer = TraceWriter::start(path, header());
        writer.write_step(TraceStep {
            step_type: TraceStepType::FinalAnswer,
            content: "42".to_string(),
            iteration: 1,
            timestamp: 1.0,
            tokens_used: None,
            duration_ms: None,
        });
        writer.finish(TraceStatus::Success, TokenUsage::default());
    }
}
