use serde::{Deserialize, Serialize};

use crate::ids::TraceId;
use crate::semantic::SemanticVerificationReport;
use crate::token_usage::TokenUsage;
use crate::verification::VerificationResult;

/// Immutable context captured at the start of a query (§3).
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub trace_id: TraceId,
    pub question: String,
    pub document_ids: Vec<usize>,
    pub model_id: String,
}

/// Why the orchestrator loop stopped iterating (§4.10 Orchestrator state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Final,
    ExecutorDied,
    MaxIterations,
    Error,
}

/// What the caller receives from a query, always, short of a `PermanentError` escaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub stop_reason: StopReason,
    pub token_usage: TokenUsage,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_verification: Option<SemanticVerificationReport>,
}
