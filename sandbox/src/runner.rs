//! In-sandbox runner protocol (§4.2).
//!
//! This module implements the synchronous, single-threaded state machine
//! that runs inside the sandboxed process: read one JSON command per line,
//! execute it against a persistent namespace, write back exactly one JSON
//! reply (except for the `llm_query` round-trip, which interleaves an extra
//! request/response pair).
//!
//! The sandboxed language itself is a build-time substitution point — this
//! crate speaks the wire protocol generically over a [`CodeEvaluator`], not
//! any particular interpreter. [`EchoEvaluator`] is a trivial evaluator
//! sufficient for protocol-level integration tests; a real deployment
//! substitutes one that actually executes the sandboxed language.

use std::collections::HashMap;

use rlm_types::{ExecutionResult, FinalOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One command read from the host, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Setup { context: Vec<String> },
    Execute { code: String },
    Ping {},
    Reset {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ok {
        status: &'static str,
    },
    Pong {
        status: &'static str,
        message: &'static str,
    },
    Execution(ExecuteReply),
    Error {
        status: &'static str,
        error: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecuteReply {
    pub status: &'static str,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_var: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_value: Option<String>,
}

impl From<ExecutionResult> for ExecuteReply {
    fn from(result: ExecutionResult) -> Self {
        let status = if result.is_error() { "error" } else { "ok" };
        let (final_answer, final_var, final_value) = match result.r#final {
            Some(FinalOutcome::Answer(answer)) => (Some(answer), None, None),
            Some(FinalOutcome::Var { name, value }) => (None, Some(name), Some(value)),
            None => (None, None, None),
        };
        Self {
            status,
            stdout: result.stdout,
            stderr: result.stderr,
            error: result.error,
            final_answer,
            final_var,
            final_value,
        }
    }
}

/// One call the evaluator makes back out to the sandboxed `llm_query`
/// built-in, blocking until the host answers with `llm_response`.
pub trait LlmQuery {
    fn query(&mut self, instruction: &str, content: &str) -> String;
}

/// Evaluates source text against a persistent namespace and reports what
/// happened. Implementors own the actual language runtime; this trait is
/// the generic seam the protocol state machine is built on.
pub trait CodeEvaluator {
    /// Bind `context` entries into the namespace (`setup`).
    fn setup(&mut self, context: Vec<String>);

    /// Execute `code` against the namespace, invoking `llm_query` on the
    /// provided callback whenever the sandboxed code calls it.
    fn execute(&mut self, code: &str, llm_query: &mut dyn LlmQuery) -> ExecutionResult;

    /// Clear user-defined names while preserving built-ins (`reset`).
    fn reset(&mut self);
}

/// A trivial evaluator for protocol-level integration tests: "executes" code
/// by treating special sentinel lines as `FINAL`/`FINAL_VAR` calls and
/// everything else as plain stdout. It has no real interpreter behind it.
#[derive(Debug, Default)]
pub struct EchoEvaluator {
    namespace: HashMap<String, String>,
}

impl CodeEvaluator for EchoEvaluator {
    fn setup(&mut self, context: Vec<String>) {
        for (i, entry) in context.into_iter().enumerate() {
            self.namespace.insert(format!("context_{i}"), entry);
        }
    }

    fn execute(&mut self, code: &str, llm_query: &mut dyn LlmQuery) -> ExecutionResult {
        let mut stdout = String::new();
        for line in code.lines() {
            if let Some(answer) = line.strip_prefix("FINAL(").and_then(|s| s.strip_suffix(')')) {
                return ExecutionResult {
                    stdout,
                    stderr: String::new(),
                    error: None,
                    r#final: Some(FinalOutcome::Answer(answer.trim_matches('"').to_string())),
                };
            }
            if let Some(var) = line
                .strip_prefix("FINAL_VAR(")
                .and_then(|s| s.strip_suffix(')'))
            {
                let var = var.trim_matches('"');
                let value = self.namespace.get(var).cloned().unwrap_or_default();
                return ExecutionResult {
                    stdout,
                    stderr: String::new(),
                    error: None,
                    r#final: Some(FinalOutcome::Var {
                        name: var.to_string(),
                        value,
                    }),
                };
            }
            if let Some(rest) = line
                .strip_prefix("llm_query(")
                .and_then(|s| s.strip_suffix(')'))
            {
                let mut parts = rest.splitn(2, ',');
                let instruction = parts.next().unwrap_or("").trim().trim_matches('"');
                let content = parts.next().unwrap_or("").trim().trim_matches('"');
                let result = llm_query.query(instruction, content);
                stdout.push_str(&result);
                stdout.push('\n');
                continue;
            }
            stdout.push_str(line);
            stdout.push('\n');
        }
        ExecutionResult {
            stdout,
            stderr: String::new(),
            error: None,
            r#final: None,
        }
    }

    fn reset(&mut self) {
        self.namespace.clear();
    }
}

/// Dispatch one already-parsed command against an evaluator, returning the
/// reply to write back. `Execute` is the only branch that may drive
/// `llm_query` round-trips through the provided callback.
pub fn handle_command(
    command: Command,
    evaluator: &mut dyn CodeEvaluator,
    llm_query: &mut dyn LlmQuery,
) -> Reply {
    match command {
        Command::Setup { context } => {
            evaluator.setup(context);
            Reply::Ok { status: "ok" }
        }
        Command::Ping {} => Reply::Pong {
            status: "ok",
            message: "pong",
        },
        Command::Reset {} => {
            evaluator.reset();
            Reply::Ok { status: "ok" }
        }
        Command::Execute { code } => {
            let result = evaluator.execute(&code, llm_query);
            Reply::Execution(result.into())
        }
    }
}

/// Parse one input line as a command, mapping unknown actions/malformed
/// JSON to the `{status: "error", ...}` shape the protocol requires rather
/// than panicking — a runner must never crash on attacker-controlled input.
pub fn parse_command(line: &str) -> Result<Command, Reply> {
    let value: Value = serde_json::from_str(line).map_err(|e| Reply::Error {
        status: "error",
        error: format!("invalid JSON: {e}"),
    })?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    serde_json::from_value(value).map_err(|_| Reply::Error {
        status: "error",
        error: format!("Unknown action: {action}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoQuery;
    impl LlmQuery for NoQuery {
        fn query(&mut self, _instruction: &str, _content: &str) -> String {
            panic!("llm_query not expected in this test")
        }
    }

    struct Echo(String);
    impl LlmQuery for Echo {
        fn query(&mut self, _instruction: &str, content: &str) -> String {
            format!("{}:{content}", self.0)
        }
    }

    #[test]
    fn setup_binds_context_and_replies_ok() {
        let mut eval = EchoEvaluator::default();
        let mut q = NoQuery;
        let reply = handle_command(
            Command::Setup {
                context: vec!["doc a".to_string()],
            },
            &mut eval,
            &mut q,
        );
        assert!(matches!(reply, Reply::Ok { status: "ok" }));
    }

    #[test]
    fn final_sentinel_is_captured() {
        let mut eval = EchoEvaluator::default();
        let mut q = NoQuery;
        let reply = handle_command(
            Command::Execute {
                code: "FINAL(\"42\")".to_string(),
            },
            &mut eval,
            &mut q,
        );
        let Reply::Execution(exec) = reply else {
            panic!("expected execution reply")
        };
        assert_eq!(exec.final_answer.as_deref(), Some("42"));
    }

    #[test]
    fn final_var_reads_from_namespace() {
        let mut eval = EchoEvaluator::default();
        let mut q = NoQuery;
        let _ = handle_command(
            Command::Setup {
                context: vec!["hello".to_string()],
            },
            &mut eval,
            &mut q,
        );
        let reply = handle_command(
            Command::Execute {
                code: "FINAL_VAR(\"context_0\")".to_string(),
            },
            &mut eval,
            &mut q,
        );
        let Reply::Execution(exec) = reply else {
            panic!("expected execution reply")
        };
        assert_eq!(exec.final_var.as_deref(), Some("context_0"));
        assert_eq!(exec.final_value.as_deref(), Some("hello"));
    }

    #[test]
    fn llm_query_call_is_routed_through_callback() {
        let mut eval = EchoEvaluator::default();
        let mut q = Echo("answered".to_string());
        let reply = handle_command(
            Command::Execute {
                code: "llm_query(\"summarize\", \"content here\")".to_string(),
            },
            &mut eval,
            &mut q,
        );
        let Reply::Execution(exec) = reply else {
            panic!("expected execution reply")
        };
        assert!(exec.stdout.contains("answered:content here"));
    }

    #[test]
    fn unknown_action_is_an_error_not_a_panic() {
        let err = parse_command(r#"{"action": "teleport"}"#).unwrap_err();
        assert!(matches!(err, Reply::Error { .. }));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let err = parse_command("not json").unwrap_err();
        assert!(matches!(err, Reply::Error { .. }));
    }

    #[test]
    fn reset_clears_namespace() {
        let mut eval = EchoEvaluator::default();
        let mut q = NoQuery;
        let _ = handle_command(
            Command::Setup {
                context: vec!["hello".to_string()],
            },
            &mut eval,
            &mut q,
        );
        let _ = handle_command(Command::Reset {}, &mut eval, &mut q);
        let reply = handle_command(
            Command::Execute {
                code: "FINAL_VAR(\"context_0\")".to_string(),
            },
            &mut eval,
            &mut q,
        );
        let Reply::Execution(exec) = reply else {
            panic!("expected execution reply")
        };
        assert_eq!(exec.final_value.as_deref(), Some(""));
    }
}
