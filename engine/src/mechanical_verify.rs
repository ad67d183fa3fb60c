//! Mechanical citation/quote verification (C8).
//!
//! Extracts citation IDs and quoted spans from a FINAL answer, synthesizes a
//! small program that checks each against the documents actually bound as
//! `context` in the executor that produced the answer, and parses the
//! result back into a [`VerificationResult`].

use std::sync::LazyLock;

use regex::Regex;
use rlm_types::{Citation, DocId, Quote, VerificationResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("sandbox execution failed: {0}")]
    Execution(String),
    #[error("could not parse verification output: {0}")]
    Parse(#[from] serde_json::Error),
}

const MIN_QUOTE_LEN: usize = 10;
const MAX_QUOTE_CHECK_LEN: usize = 60;

static CITATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\bDoc\s+\*\*(\d+)\*\*").unwrap(),
        Regex::new(r"\bDoc\s+(\d+)").unwrap(),
        Regex::new(r"\bcontext\[(\d+)\]").unwrap(),
        // No lookaround in this regex engine, so the word-boundary check on
        // both sides is done manually in `extract_ordered` after matching.
        Regex::new(r"\*\*(\d+)\*\*").unwrap(),
    ]
});

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True if the standalone-bold-number pattern's match at `[start, end)` in
/// `text` is not adjacent to a word character on either side.
fn has_clean_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before_ok = start == 0 || text.as_bytes().get(start - 1).is_none_or(|&b| !is_word_byte(b));
    let after_ok = text.as_bytes().get(end).is_none_or(|&b| !is_word_byte(b));
    before_ok && after_ok
}

static QUOTE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(&format!(r#""([^"]{{{MIN_QUOTE_LEN},}})""#)).unwrap(),
        Regex::new(&format!(r"`([^`]{{{MIN_QUOTE_LEN},}})`")).unwrap(),
    ]
});

struct Match {
    offset: usize,
    text: String,
}

/// Every pattern's matches, tagged with a true byte offset, sorted globally
/// by that offset, then deduplicated in that order.
///
/// Patterns are applied independently of each other here — unlike
/// per-pattern-then-dedup, which orders overlapping matches by
/// (pattern priority, within-pattern position) instead of true text order.
fn extract_ordered(text: &str, patterns: &[Regex], check_word_boundary: bool) -> Vec<String> {
    let mut all: Vec<Match> = Vec::new();
    for (i, pattern) in patterns.iter().enumerate() {
        let is_last = i + 1 == patterns.len();
        for caps in pattern.captures_iter(text) {
            let group = caps.get(1).expect("pattern has one capture group");
            if check_word_boundary && is_last {
                let whole = caps.get(0).expect("match has a full span");
                if !has_clean_word_boundary(text, whole.start(), whole.end()) {
                    continue;
                }
            }
            all.push(Match { offset: group.start(), text: group.as_str().to_string() });
        }
    }
    all.sort_by_key(|m| m.offset);

    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for m in all {
        if seen.insert(m.text.clone()) {
            ordered.push(m.text);
        }
    }
    ordered
}

#[must_use]
pub fn extract_citation_ids(answer: &str) -> Vec<DocId> {
    extract_ordered(answer, &CITATION_PATTERNS, true)
        .into_iter()
        .filter_map(|s| s.parse::<DocId>().ok())
        .collect()
}

#[must_use]
pub fn extract_quotes(answer: &str) -> Vec<String> {
    extract_ordered(answer, &QUOTE_PATTERNS, false)
}

/// Python source executed inside the sandbox to check citations and quotes
/// against the bound `context` documents.
#[must_use]
pub fn build_verification_code(answer: &str) -> String {
    let citation_ids = extract_citation_ids(answer);
    let quotes = extract_quotes(answer);

    let mut code = String::from("import json\ncitations = []\nquotes = []\n");
    for doc_id in &citation_ids {
        code.push_str(&format!(
            "try:\n    context[{doc_id}]\n    citations.append({{'doc_id': {doc_id}, 'found': True}})\nexcept (IndexError, KeyError, NameError):\n    citations.append({{'doc_id': {doc_id}, 'found': False}})\n"
        ));
    }
    let citation_id_list = format!("[{}]", citation_ids.iter().map(DocId::to_string).collect::<Vec<_>>().join(", "));
    for quote in &quotes {
        let truncated: String = quote.chars().take(MAX_QUOTE_CHECK_LEN).collect();
        let needle = serde_json::to_string(&truncated).unwrap_or_else(|_| "\"\"".to_string());
        code.push_str(&format!(
            "_needle = {needle}.lower()\n_hit = -1\nfor _doc_id in {citation_id_list}:\n    try:\n        if _needle in str(context[_doc_id]).lower():\n            _hit = _doc_id\n            break\n    except (IndexError, KeyError, NameError):\n        continue\nquotes.append({{'text': {needle}, 'doc_id': _hit, 'found': _hit != -1}})\n"
        ));
    }
    code.push_str("print(json.dumps({'citations': citations, 'quotes': quotes}))\n");
    code
}

#[derive(serde::Deserialize)]
struct RawVerificationOutput {
    citations: Vec<RawCitation>,
    quotes: Vec<RawQuote>,
}

#[derive(serde::Deserialize)]
struct RawCitation {
    doc_id: DocId,
    found: bool,
}

#[derive(serde::Deserialize)]
struct RawQuote {
    text: String,
    doc_id: DocId,
    found: bool,
}

pub fn parse_verification_output(stdout: &str) -> Result<VerificationResult, VerificationError> {
    let raw: RawVerificationOutput = serde_json::from_str(stdout.trim())?;
    Ok(VerificationResult {
        citations: raw.citations.into_iter().map(|c| Citation { doc_id: c.doc_id, found: c.found }).collect(),
        quotes: raw.quotes.into_iter().map(|q| Quote { text: q.text, doc_id: q.doc_id, found: q.found }).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_citations_in_true_text_order_not_pattern_priority_order() {
        // "context[7]" physically precedes "Doc **3**" in the text, even
        // though the Doc-N-bold pattern has higher priority.
        let answer = "See context[7] and also Doc **3** for details.";
        let ids = extract_citation_ids(answer);
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn deduplicates_citations_by_first_appearance() {
        let answer = "Doc 1 says X. context[1] confirms it. Doc 1 again.";
        let ids = extract_citation_ids(answer);
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn standalone_bold_number_not_adjacent_to_word_chars_is_a_citation() {
        let answer = "confidence is **42** percent";
        let ids = extract_citation_ids(answer);
        assert_eq!(ids, vec![42]);
    }

    #[test]
    fn extracts_quotes_from_double_quotes_and_backticks() {
        let answer = r#"The doc says "this is a long enough quote" and `another long code snippet`."#;
        let quotes = extract_quotes(answer);
        assert_eq!(quotes, vec!["this is a long enough quote".to_string(), "another long code snippet".to_string()]);
    }

    #[test]
    fn short_quotes_below_minimum_length_are_ignored() {
        let answer = r#""short" is too brief"#;
        assert!(extract_quotes(answer).is_empty());
    }

    #[test]
    fn generated_code_checks_each_citation_and_quote() {
        let code = build_verification_code("Doc 0 says \"a sufficiently long quoted span\".");
        assert!(code.contains("context[0]"));
        assert!(code.contains("json.dumps"));
    }

    #[test]
    fn generated_quote_check_only_scans_cited_documents() {
        let code = build_verification_code("Doc 0 says \"a sufficiently long quoted span\".");
        assert!(code.contains("for _doc_id in [0]:"));
        assert!(!code.contains("enumerate(context)"));
    }

    #[test]
    fn generated_quote_check_has_empty_citation_list_when_answer_cites_nothing() {
        let code = build_verification_code("\"a sufficiently long quoted span\" with no citation.");
        assert!(code.contains("for _doc_id in []:"));
    }

    #[test]
    fn parses_verification_stdout() {
        let stdout = r#"{"citations":[{"doc_id":0,"found":true}],"quotes":[{"text":"x","doc_id":-1,"found":false}]}"#;
        let result = parse_verification_output(stdout).unwrap();
        assert!(result.citations[0].found);
        assert!(!result.quotes[0].found);
        assert!(!result.all_valid());
    }

    #[test]
    fn unparseable_output_is_a_verification_error() {
        assert!(parse_verification_output("not json").is_err());
    }
}
