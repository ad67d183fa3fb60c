use serde::{Deserialize, Serialize};

/// What the sandboxed code resolved to when `execute` returned, beyond
/// plain stdout/stderr (§4.2, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalOutcome {
    /// `FINAL(answer)` was called; `answer` is the literal argument.
    Answer(String),
    /// `FINAL_VAR(name)` was called; `value` is `str(namespace[name])`.
    Var { name: String, value: String },
}

/// Outcome of one `execute(code)` call against a sandbox executor (§4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub r#final: Option<FinalOutcome>,
}

impl ExecutionResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
