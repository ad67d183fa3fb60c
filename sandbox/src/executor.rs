//! Host-side sandbox executor (§4.3).
//!
//! Drives one sandbox child process: launches it, speaks the framed
//! protocol, dispatches `llm_query` requests back out to the host's query
//! handler, and tracks liveness. Not thread-safe — callers must serialize
//! access to a single executor (the container pool in `pool.rs` enforces
//! this by handing out exclusive ownership).

use std::process::Stdio;
use std::time::Duration;

use rlm_types::ExecutionResult;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::process::{ChildGuard, set_new_session};
use crate::transport::{Frame, FramedReader, TransportError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to launch sandbox process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("sandbox transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("sandbox replied with malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("sandbox reported a protocol error: {0}")]
    Protocol(String),
    #[error("sandbox executor is not running")]
    NotStarted,
}

/// Sandbox resource/isolation settings, passed through to the host container
/// substrate when the process is launched (§4.3).
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub command: String,
    pub args: Vec<String>,
    pub network_disabled: bool,
    pub read_only_root: bool,
    pub drop_all_capabilities: bool,
    pub privileged: bool,
    pub no_new_privileges: bool,
    pub memory_limit_mb: u64,
    pub cpu_count: u32,
}

impl SandboxSettings {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            network_disabled: true,
            read_only_root: true,
            drop_all_capabilities: true,
            privileged: false,
            no_new_privileges: true,
            memory_limit_mb: 512,
            cpu_count: 1,
        }
    }
}

/// Host callback invoked for each `llm_query` request the sandbox makes.
pub trait QueryHandler: Send {
    fn handle(
        &mut self,
        instruction: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<String, ExecutorError>> + Send;
}

/// One sandbox process plus its framed I/O state.
pub struct SandboxExecutor {
    settings: SandboxSettings,
    guard: Option<ChildGuard>,
    reader: Option<FramedReader<tokio::process::ChildStdout>>,
    alive: bool,
}

impl SandboxExecutor {
    #[must_use]
    pub fn new(settings: SandboxSettings) -> Self {
        Self {
            settings,
            guard: None,
            reader: None,
            alive: false,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub async fn start(&mut self) -> Result<(), ExecutorError> {
        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        set_new_session(&mut command);

        let mut child: Child = command.spawn().map_err(ExecutorError::Spawn)?;
        let stdout = child.stdout.take().expect("piped stdout");
        self.reader = Some(FramedReader::new(stdout));
        self.guard = Some(ChildGuard::new(child));
        self.alive = true;
        tracing::debug!(command = %self.settings.command, "sandbox executor started");
        Ok(())
    }

    async fn send_line(&mut self, value: &Value) -> Result<(), ExecutorError> {
        let guard = self.guard.as_mut().ok_or(ExecutorError::NotStarted)?;
        let stdin = guard
            .child_mut()
            .stdin
            .as_mut()
            .expect("piped stdin");
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        if stdin.write_all(&line).await.is_err() {
            self.alive = false;
            tracing::warn!("sandbox stdin closed; executor marked dead");
            return Err(ExecutorError::Protocol("sandbox stdin closed".to_string()));
        }
        Ok(())
    }

    async fn read_reply(&mut self, timeout: Duration) -> Result<Value, ExecutorError> {
        loop {
            let reader = self.reader.as_mut().ok_or(ExecutorError::NotStarted)?;
            let frame = match reader.read_frame(timeout).await {
                Ok(frame) => frame,
                Err(e) => {
                    self.alive = false;
                    tracing::warn!(error = %e, "sandbox transport error; executor marked dead");
                    return Err(e.into());
                }
            };
            let Frame::Stdout(line) = frame else {
                // stderr is diagnostic only; never part of the protocol.
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(line)?);
        }
    }

    pub async fn setup_context(
        &mut self,
        context: Vec<String>,
        timeout: Duration,
    ) -> Result<(), ExecutorError> {
        self.send_line(&json!({"action": "setup", "context": context}))
            .await?;
        let reply = self.read_reply(timeout).await?;
        expect_ok(&reply)
    }

    pub async fn reset_namespace(&mut self, timeout: Duration) -> Result<(), ExecutorError> {
        self.send_line(&json!({"action": "reset"})).await?;
        let reply = self.read_reply(timeout).await?;
        expect_ok(&reply)
    }

    pub async fn ping(&mut self, timeout: Duration) -> Result<(), ExecutorError> {
        self.send_line(&json!({"action": "ping"})).await?;
        let reply = self.read_reply(timeout).await?;
        expect_ok(&reply)
    }

    /// Run `code`, dispatching any `llm_query` sub-requests through `on_query`
    /// until the sandbox sends a terminal `execute` reply.
    pub async fn execute(
        &mut self,
        code: &str,
        timeout: Duration,
        mut on_query: impl QueryHandler,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.send_line(&json!({"action": "execute", "code": code}))
            .await?;

        loop {
            let reply = self.read_reply(timeout).await?;
            if reply.get("action").and_then(Value::as_str) == Some("llm_query") {
                let instruction = reply
                    .get("instruction")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let content = reply
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let result = on_query.handle(instruction, content).await?;
                self.send_line(&json!({"action": "llm_response", "result": result}))
                    .await?;
                continue;
            }
            return parse_execution_result(&reply);
        }
    }

    /// Best-effort shutdown; idempotent.
    pub async fn stop(&mut self) {
        self.alive = false;
        if let Some(mut guard) = self.guard.take() {
            let child = guard.child_mut();
            let _ = child.start_kill();
            let _ = child.wait().await;
            guard.disarm();
            tracing::debug!("sandbox executor stopped");
        }
        self.reader = None;
    }
}

fn expect_ok(reply: &Value) -> Result<(), ExecutorError> {
    match reply.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(()),
        _ => Err(ExecutorError::Protocol(format!(
            "expected ok status, got: {reply}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RawExecutionResult {
    status: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    error: Option<String>,
    final_answer: Option<String>,
    final_var: Option<String>,
    final_value: Option<String>,
}

fn parse_execution_result(reply: &Value) -> Result<ExecutionResult, ExecutorError> {
    let raw: RawExecutionResult = serde_json::from_value(reply.clone())?;
    let r#final = match (raw.final_answer, raw.final_var, raw.final_value) {
        (Some(answer), _, _) => Some(rlm_types::FinalOutcome::Answer(answer)),
        (None, Some(name), value) => Some(rlm_types::FinalOutcome::Var {
            name,
            value: value.unwrap_or_default(),
        }),
        (None, None, _) => None,
    };
    Ok(ExecutionResult {
        stdout: raw.stdout,
        stderr: raw.stderr,
        error: if raw.status == "error" {
            Some(raw.error.unwrap_or_else(|| "unknown sandbox error".into()))
        } else {
            raw.error
        },
        r#final,
    })
}
