//! Two-layer semantic verification (C9).
//!
//! Layer 1 asks a sub-model to adversarially check every claim in the
//! answer against the cited documents. Layer 2, only reachable when the
//! documents are mostly code and Layer 1 raised findings, asks a
//! code-specialized template to re-check those findings.

use std::sync::LazyLock;

use regex::Regex;
use rlm_types::{Document, FindingVerification, SemanticVerificationReport};
use thiserror::Error;

use crate::mechanical_verify::extract_citation_ids;
use crate::prompt::PromptSet;

#[derive(Debug, Error)]
pub enum SemanticVerifyError {
    #[error("no verification JSON found in model response")]
    NoJsonFound,
    #[error("verification JSON missing required field: {0}")]
    MissingField(&'static str),
}

/// Build the `### Document N (name)` blob for every in-range cited document;
/// out-of-range citation ids are skipped. Returns `None` if no citation
/// resolved to a real document.
#[must_use]
pub fn gather_cited_documents(answer: &str, documents: &[Document]) -> Option<String> {
    let ids = extract_citation_ids(answer);
    let mut sections = Vec::new();
    for id in ids {
        let Ok(index) = usize::try_from(id) else { continue };
        let Some(doc) = documents.get(index) else { continue };
        sections.push(format!("### Document {id} ({})\n\n{}", doc.name, doc.content));
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n---\n\n"))
    }
}

static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\s*```").expect("valid code-block regex"));

#[derive(serde::Deserialize)]
struct RawFindings {
    findings: Vec<RawFinding>,
}

#[derive(serde::Deserialize)]
struct RawFinding {
    finding_id: String,
    original_claim: String,
    confidence: rlm_types::Confidence,
    reason: String,
    #[serde(default)]
    evidence_classification: String,
    #[serde(default)]
    flags: Vec<String>,
}

impl From<RawFinding> for FindingVerification {
    fn from(raw: RawFinding) -> Self {
        FindingVerification {
            finding_id: raw.finding_id,
            original_claim: raw.original_claim,
            confidence: raw.confidence,
            reason: raw.reason,
            evidence_classification: raw.evidence_classification,
            flags: raw.flags,
        }
    }
}

fn try_parse_findings(text: &str) -> Option<Vec<FindingVerification>> {
    let raw: RawFindings = serde_json::from_str(text).ok()?;
    Some(raw.findings.into_iter().map(FindingVerification::from).collect())
}

/// Tolerant JSON extraction matching three tiers in order: fenced code
/// blocks, individual lines beginning with `{`, then the whole text.
pub fn parse_verification_response(text: &str) -> Result<Vec<FindingVerification>, SemanticVerifyError> {
    for block in CODE_BLOCK_RE.captures_iter(text) {
        if let Some(findings) = try_parse_findings(block[1].trim()) {
            return Ok(findings);
        }
    }
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            if let Some(findings) = try_parse_findings(trimmed) {
                return Ok(findings);
            }
        }
    }
    try_parse_findings(text.trim()).ok_or(SemanticVerifyError::NoJsonFound)
}

/// Run Layer 1 (always) and Layer 2 (only for code-majority documents with
/// Layer 1 findings) semantic verification, using `complete` to drive the
/// sub-model. Returns `None` if both templates are absent, or if parsing
/// ultimately fails — semantic verification never blocks an answer.
pub async fn run<F, Fut>(
    prompts: &PromptSet,
    answer: &str,
    documents: &[Document],
    mut complete: F,
) -> Option<SemanticVerificationReport>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Option<String>>,
{
    let doc_names: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();
    let content_type = rlm_types::detect_content_type(&doc_names);

    let gathered = gather_cited_documents(answer, documents).unwrap_or_default();
    let layer1_prompt = prompts.render_verify_adversarial(answer, &gathered)?;
    let layer1_response = complete(layer1_prompt).await?;
    let layer1_findings = parse_verification_response(&layer1_response).ok()?;

    if content_type != rlm_types::ContentType::Code || layer1_findings.is_empty() {
        return Some(SemanticVerificationReport { findings: layer1_findings });
    }

    let Ok(layer1_json) = serde_json::to_string(&SemanticVerificationReport { findings: layer1_findings.clone() })
    else {
        return Some(SemanticVerificationReport { findings: layer1_findings });
    };
    let Some(layer2_prompt) = prompts.render_verify_code(&layer1_json, answer, &gathered) else {
        return Some(SemanticVerificationReport { findings: layer1_findings });
    };
    let Some(layer2_response) = complete(layer2_prompt).await else {
        return Some(SemanticVerificationReport { findings: layer1_findings });
    };
    match parse_verification_response(&layer2_response) {
        Ok(layer2_findings) => Some(SemanticVerificationReport { findings: layer2_findings }),
        Err(_) => Some(SemanticVerificationReport { findings: layer1_findings }),
    }
}
