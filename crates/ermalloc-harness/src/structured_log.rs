//! JSONL records for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to any `Write` sink with sequential trace ids.
//! - [`validate_log_line`]: checks a single line against the record schema.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Scenario or run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Chain label, innermost first (`nil+r3`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<String>,
    /// Integer enforcement status as returned by `er_enforce_policies`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrecoverable: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            scenario: None,
            policies: None,
            status: None,
            corrected: None,
            unrecoverable: None,
            outcome: None,
            latency_ns: None,
            details: None,
        }
    }

    /// Set the scenario name and its chain label.
    #[must_use]
    pub fn with_scenario(mut self, name: impl Into<String>, policies: impl Into<String>) -> Self {
        self.scenario = Some(name.into());
        self.policies = Some(policies.into());
        self
    }

    /// Set enforcement findings.
    #[must_use]
    pub fn with_findings(mut self, status: i32, corrected: u64, unrecoverable: u64) -> Self {
        self.status = Some(status);
        self.corrected = Some(corrected);
        self.unrecoverable = Some(unrecoverable);
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set latency in nanoseconds.
    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse one JSONL line and check the required fields are non-empty.
pub fn validate_log_line(line: &str) -> Result<LogEntry, String> {
    let entry: LogEntry = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    if entry.timestamp.is_empty() {
        return Err(String::from("empty timestamp"));
    }
    if entry.trace_id.is_empty() {
        return Err(String::from("empty trace_id"));
    }
    if entry.event.is_empty() {
        return Err(String::from("empty event"));
    }
    Ok(entry)
}

/// Writes JSONL log entries.
pub struct LogEmitter<W: Write> {
    writer: W,
    seq: u64,
    run_id: String,
}

impl LogEmitter<BufWriter<File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), run_id))
    }
}

impl<W: Write> LogEmitter<W> {
    /// Create an emitter over any writer.
    pub fn new(writer: W, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:04}", self.run_id, self.seq)
    }

    /// Emit an entry with required fields only.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = LogEntry::new(String::new(), level, event);
        self.emit_entry(entry)
    }

    /// Emit a fully-populated entry. Fills `trace_id` and `run_id` when unset.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<LogEntry> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(entry)
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", duration.as_secs(), duration.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_skips_unset_fields() {
        let entry = LogEntry::new("run::0001", LogLevel::Info, "scenario_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "run::0001");
        assert_eq!(parsed["level"], "info");
        assert!(parsed.get("status").is_none());
        assert!(parsed.get("outcome").is_none());
    }

    #[test]
    fn emitter_numbers_lines() {
        let mut emitter = LogEmitter::new(Vec::new(), "run-7");
        emitter.emit(LogLevel::Info, "start").unwrap();
        let entry = LogEntry::new("", LogLevel::Warn, "scenario_end")
            .with_scenario("tmr-single-flip", "r3")
            .with_findings(1, 1, 0)
            .with_outcome(Outcome::Pass);
        emitter.emit_entry(entry).unwrap();

        let text = String::from_utf8(emitter.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first = validate_log_line(lines[0]).unwrap();
        let second = validate_log_line(lines[1]).unwrap();
        assert_eq!(first.trace_id, "run-7::0001");
        assert_eq!(second.trace_id, "run-7::0002");
        assert_eq!(second.run_id.as_deref(), Some("run-7"));
        assert_eq!(second.status, Some(1));
        assert_eq!(second.outcome, Some(Outcome::Pass));
    }

    #[test]
    fn invalid_lines_are_rejected() {
        assert!(validate_log_line("not json").is_err());
        assert!(
            validate_log_line(r#"{"timestamp":"1","trace_id":"","level":"info","event":"x"}"#)
                .is_err()
        );
        assert!(
            validate_log_line(r#"{"timestamp":"1","trace_id":"t","level":"loud","event":"x"}"#)
                .is_err()
        );
    }
}
