use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An already-parsed document handed to the engine by a collaborator parser.
///
/// `content` is decoded plain text; the engine never sees PDFs, HTML, or other
/// source formats directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub content: String,
    pub format: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            format: format.into(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Closed set of source-code extensions used by content-type detection (§4.9).
///
/// A document is considered code if its name ends in one of these, matched
/// case-insensitively against the extension only.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "pl", "pm", "t", "js", "ts", "jsx", "tsx", "mjs", "cjs", "rs", "go", "java", "rb", "c",
    "cpp", "h", "hpp", "cc", "cs", "swift", "kt", "scala", "clj", "ex", "exs", "sh", "bash", "zsh",
    "ps1", "sql", "r", "m", "mm", "lua", "vim", "el", "hs", "php", "dart", "v", "zig",
];

#[must_use]
pub fn is_code_document(doc_name: &str) -> bool {
    doc_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| CODE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Content type used to pick between semantic-verification layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Code,
    General,
}

/// Strict-majority rule: `code` only if more than half of the names look like code.
/// Ties (including the empty-list case) resolve to `general`.
#[must_use]
pub fn detect_content_type(doc_names: &[String]) -> ContentType {
    if doc_names.is_empty() {
        return ContentType::General;
    }
    let code_count = doc_names.iter().filter(|name| is_code_document(name)).count();
    if code_count * 2 > doc_names.len() {
        ContentType::Code
    } else {
        ContentType::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_extension_matches_case_insensitively() {
        assert!(is_code_document("main.RS"));
        assert!(is_code_document("script.py"));
        assert!(!is_code_document("README.md"));
        assert!(!is_code_document("noext"));
    }

    #[test]
    fn strict_majority_required_for_code() {
        let half = vec!["a.py".to_string(), "b.txt".to_string()];
        assert_eq!(detect_content_type(&half), ContentType::General);

        let majority = vec!["a.py".to_string(), "b.rs".to_string(), "c.txt".to_string()];
        assert_eq!(detect_content_type(&majority), ContentType::Code);

        let empty: Vec<String> = vec![];
        assert_eq!(detect_content_type(&empty), ContentType::General);
    }
}
