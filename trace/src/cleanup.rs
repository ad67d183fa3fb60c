//! Post-hoc trace retention (§4.10): after a query completes, delete the
//! oldest trace files in its project directory beyond `max_traces_per_project`.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Remove the oldest `*.jsonl` files in `dir` until at most `max_traces`
/// remain. Returns the number of files removed. Per-file failures (a
/// trace file being deleted or read concurrently) are logged and skipped
/// rather than aborting the whole sweep.
pub fn enforce_retention(dir: &Path, max_traces: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut traces: Vec<(SystemTime, std::path::PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    if traces.len() <= max_traces {
        return 0;
    }

    traces.sort_by_key(|(modified, _)| *modified);
    let excess = traces.len() - max_traces;
    let mut removed = 0;
    for (_, path) in traces.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to remove old trace file");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"{}").unwrap();
        // Ensure distinct mtimes so sort order is deterministic.
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    #[test]
    fn keeps_at_most_max_traces_and_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            touch(dir.path(), &format!("trace-{i}.jsonl"));
        }
        let removed = enforce_retention(dir.path(), 3);
        assert_eq!(removed, 2);
        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&"trace-2.jsonl".to_string()));
        assert!(remaining.contains(&"trace-3.jsonl".to_string()));
        assert!(remaining.contains(&"trace-4.jsonl".to_string()));
    }

    #[test]
    fn does_nothing_when_under_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "trace-0.jsonl");
        assert_eq!(enforce_retention(dir.path(), 50), 0);
    }

    #[test]
    fn missing_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(enforce_retention(&missing, 10), 0);
    }

    #[test]
    fn ignores_non_jsonl_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        assert_eq!(enforce_retention(dir.path(), 0), 0);
    }
}
