use serde::{Deserialize, Serialize};

use crate::ids::TraceId;

/// Kind of one recorded step in a query's trace (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceStepType {
    CodeGenerated,
    CodeOutput,
    FinalAnswer,
    Verification,
    SemanticVerification,
    Error,
}

/// A single immutable entry appended to a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub step_type: TraceStepType,
    pub content: String,
    pub iteration: u32,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Header line written immediately when a query starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHeader {
    pub trace_id: TraceId,
    pub started_at: String,
    pub question: String,
    pub document_refs: Vec<String>,
    pub model: String,
}

/// Terminal status recorded in a trace summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Interrupted,
    Error,
}

/// Summary line written once, on every exit path (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub status: TraceStatus,
    pub elapsed_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}
