//! Export-time redaction (§4.10/§4.11).
//!
//! The on-disk trace is always raw. Exporting it — to a UI, a bug report, a
//! downstream log sink — runs every line's `content` field through
//! [`rlm_core::redact`] first. This never touches the file on disk.

use std::io::{self, BufRead};
use std::path::Path;

use serde_json::Value;

/// Read a trace file and return its lines with `content` fields redacted.
/// A line that fails to parse as JSON is passed through unredacted rather
/// than dropped, since an export should never silently lose data.
pub fn export_redacted(path: &Path) -> io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    io::BufReader::new(file)
        .lines()
        .map(|line| line.map(|l| redact_line(&l)))
        .collect()
}

fn redact_line(line: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(line) else {
        return line.to_string();
    };
    if let Some(content) = value.get_mut("content") {
        if let Some(text) = content.as_str() {
            *content = Value::String(rlm_core::redact(text));
        }
    }
    serde_json::to_string(&value).unwrap_or_else(|_| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_content_field_in_step_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"header\",\"trace_id\":\"t1\"}\n{\"type\":\"step\",\"content\":\"key=sk-ant-REDACTED\"}\n",
        )
        .unwrap();

        let lines = export_redacted(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(!lines[1].contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(lines[1].contains("sk-ant-***"));
    }

    #[test]
    fn passes_through_unparseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        std::fs::write(&path, "not json at all\n").unwrap();
        let lines = export_redacted(&path).unwrap();
        assert_eq!(lines, vec!["not json at all".to_string()]);
    }
}
