//! Small text helpers shared across crates that don't need their own home.

/// Truncate `text` to at most `max_chars` characters, appending a marker that
/// states how many characters were dropped (used for sandbox stdout/stderr
/// capture in the orchestrator loop, §4.7 step 3).
#[must_use]
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    let dropped = char_count - max_chars;
    format!("{truncated}\n... [truncated, {dropped} characters omitted]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_short_text_untouched() {
        assert_eq!(truncate_with_marker("hello", 10), "hello");
    }

    #[test]
    fn truncates_and_reports_dropped_count() {
        let long = "x".repeat(100);
        let out = truncate_with_marker(&long, 10);
        assert!(out.starts_with(&"x".repeat(10)));
        assert!(out.contains("90 characters omitted"));
    }
}
