use serde::{Deserialize, Serialize};

/// Confidence label a sub-model assigns to one claim during semantic verification (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Verdict on one claim extracted from the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingVerification {
    pub finding_id: String,
    pub original_claim: String,
    pub confidence: Confidence,
    pub reason: String,
    #[serde(default)]
    pub evidence_classification: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Output of the two-layer semantic verification pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticVerificationReport {
    pub findings: Vec<FindingVerification>,
}

impl SemanticVerificationReport {
    /// Findings worth surfacing to a caller: high or medium confidence.
    #[must_use]
    pub fn high_confidence(&self) -> Vec<&FindingVerification> {
        self.findings
            .iter()
            .filter(|f| matches!(f.confidence, Confidence::High | Confidence::Medium))
            .collect()
    }

    #[must_use]
    pub fn low_confidence(&self) -> Vec<&FindingVerification> {
        self.findings
            .iter()
            .filter(|f| matches!(f.confidence, Confidence::Low))
            .collect()
    }
}
