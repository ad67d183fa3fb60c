//! The RLM iteration loop (C7): model call → code extraction → sandbox
//! execution → termination check, repeated until `FINAL`, the executor
//! dies without a pool to recover into, or `max_iterations` is hit.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use rlm_config::EngineConfig;
use rlm_providers::ModelClient;
use rlm_sandbox::{ExecutorError, ExecutorPool, QueryHandler, SandboxExecutor, SandboxSettings};
use rlm_trace::{TraceWriter, enforce_retention};
use rlm_types::{
    Document, FinalOutcome, Message, QueryContext, QueryResult, StopReason, TokenUsage,
    TraceHeader, TraceStatus, TraceStep, TraceStepType,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::EngineError;
use crate::mechanical_verify::{build_verification_code, parse_verification_output};
use crate::prompt::{PromptSet, format_doc_sizes_list};
use crate::semantic_verify;

const STDOUT_STDERR_CAP: usize = 50_000;

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:repl|python)\s*\n(.*?)```").expect("valid fence regex"));

/// Extract every `repl`/`python` fenced block, concatenated in source order.
#[must_use]
pub fn extract_code_blocks(text: &str) -> Option<String> {
    let blocks: Vec<&str> = CODE_FENCE_RE.captures_iter(text).map(|c| c.get(1).unwrap().as_str()).collect();
    if blocks.is_empty() { None } else { Some(blocks.join("\n")) }
}

/// Raised when a sandbox's `llm_query` content exceeds the configured cap.
#[derive(Debug, thiserror::Error)]
#[error("subcall content of {actual} chars exceeds the {limit} char limit; chunk it into smaller pieces")]
pub struct SubcallContentError {
    pub actual: usize,
    pub limit: usize,
}

/// Drives one query end to end.
pub struct Orchestrator<M: ModelClient> {
    config: Arc<EngineConfig>,
    prompts: Arc<PromptSet>,
    model: Arc<M>,
    pool: Option<Arc<ExecutorPool>>,
    progress: Option<UnboundedSender<TraceStep>>,
}

impl<M: ModelClient> Orchestrator<M> {
    /// Rejects a config with `max_iterations == 0` or `pool_size == 0` up
    /// front rather than letting the loop below silently misbehave on it.
    pub fn new(
        config: Arc<EngineConfig>,
        prompts: Arc<PromptSet>,
        model: Arc<M>,
        pool: Option<Arc<ExecutorPool>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config, prompts, model, pool, progress: None })
    }

    /// Attach a channel that receives a clone of every [`TraceStep`] as it's
    /// recorded, for an embedding UI to consume live rather than waiting for
    /// the persisted trace file.
    #[must_use]
    pub fn with_progress(mut self, sender: UnboundedSender<TraceStep>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Write `step` to the trace and forward a copy to the progress channel,
    /// if one is attached.
    fn record_step(&self, trace: &mut TraceWriter, step: TraceStep) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(step.clone());
        }
        trace.write_step(step);
    }

    /// Run one query to completion. `trace_dir` is the directory the
    /// caller wants this query's JSONL trace written into; routing traces
    /// to a per-project directory is the caller's concern.
    pub async fn query(
        &self,
        context: QueryContext,
        documents: Vec<Document>,
        trace_dir: &Path,
    ) -> Result<QueryResult, EngineError> {
        let start = Instant::now();
        let doc_names: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();

        let trace_path = trace_dir.join(format!("{}.jsonl", context.trace_id));
        let mut trace = TraceWriter::start(
            trace_path,
            TraceHeader {
                trace_id: context.trace_id.clone(),
                started_at: chrono::Utc::now().to_rfc3339(),
                question: context.question.clone(),
                document_refs: doc_names.clone(),
                model: context.model_id.clone(),
            },
        );

        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let doc_chars: Vec<usize> = documents.iter().map(Document::char_count).collect();
        let total_chars: usize = doc_chars.iter().sum();
        let doc_sizes_list = format_doc_sizes_list(&doc_names, &doc_chars);
        let system_prompt = self.prompts.render_system(
            documents.len(),
            total_chars,
            &doc_sizes_list,
            self.config.max_subcall_content_chars,
        );

        let mut token_usage = TokenUsage::default();

        let mut executor = match self.acquire_executor().await {
            Ok(executor) => executor,
            Err(error) => {
                trace.finish(TraceStatus::Error, token_usage);
                return Err(error);
            }
        };
        if let Err(error) = executor.setup_context(contents, self.config.sandbox.execute_timeout()).await {
            executor.stop().await;
            trace.finish(TraceStatus::Error, token_usage);
            return Err(error.into());
        }

        let mut messages = vec![Message::system(system_prompt), Message::user(context.question.clone())];
        let mut iteration: u32 = 0;
        let mut final_answer: Option<String> = None;

        let outcome = loop {
            let response = match self.model.complete(&messages, &context.model_id).await {
                Ok(response) => response,
                Err(error) => {
                    executor.stop().await;
                    trace.finish(TraceStatus::Error, token_usage);
                    return Err(error.into());
                }
            };
            token_usage.add(TokenUsage {
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
            });
            self.record_step(&mut trace, TraceStep {
                step_type: TraceStepType::CodeGenerated,
                content: response.content.clone(),
                iteration,
                timestamp: elapsed_secs(start),
                tokens_used: Some(response.total_tokens()),
                duration_ms: None,
            });
            messages.push(Message::assistant(response.content.clone()));
            tracing::info!(iteration, "orchestrator iteration boundary");

            let Some(code) = extract_code_blocks(&response.content) else {
                let hint = self.prompts.code_required().to_string();
                self.record_step(&mut trace, TraceStep {
                    step_type: TraceStepType::CodeOutput,
                    content: hint.clone(),
                    iteration,
                    timestamp: elapsed_secs(start),
                    tokens_used: None,
                    duration_ms: None,
                });
                messages.push(Message::user(hint));
                if iteration + 1 == self.config.max_iterations {
                    break StopReason::MaxIterations;
                }
                iteration += 1;
                continue;
            };

            let mut subcall_tokens = TokenUsage::default();
            let exec_start = Instant::now();
            let handler = SubcallHandler {
                model: &self.model,
                prompts: &self.prompts,
                model_id: &context.model_id,
                max_chars: self.config.max_subcall_content_chars,
                tokens: &mut subcall_tokens,
                trace: &mut trace,
                progress: self.progress.as_ref(),
                iteration,
                start,
            };
            let exec_outcome = executor.execute(&code, self.config.sandbox.execute_timeout(), handler).await;
            let exec_duration_ms = u64::try_from(exec_start.elapsed().as_millis()).unwrap_or(u64::MAX);
            token_usage.add(subcall_tokens);

            let exec_result = match exec_outcome {
                Ok(result) => result,
                Err(ExecutorError::Protocol(message)) => {
                    let content = format!("execution error: {message}");
                    self.record_step(&mut trace, TraceStep {
                        step_type: TraceStepType::Error,
                        content: content.clone(),
                        iteration,
                        timestamp: elapsed_secs(start),
                        tokens_used: None,
                        duration_ms: Some(exec_duration_ms),
                    });
                    messages.push(Message::user(content));

                    if !executor.is_alive() {
                        if let Some(pool) = &self.pool {
                            pool.discard(executor).await;
                            executor = match pool.acquire().await {
                                Ok(fresh) => fresh,
                                Err(error) => {
                                    trace.finish(TraceStatus::Error, token_usage);
                                    return Err(error.into());
                                }
                            };
                        } else {
                            break StopReason::ExecutorDied;
                        }
                    }
                    if iteration + 1 == self.config.max_iterations {
                        break StopReason::MaxIterations;
                    }
                    iteration += 1;
                    continue;
                }
                Err(error) => {
                    executor.stop().await;
                    trace.finish(TraceStatus::Error, token_usage);
                    return Err(error.into());
                }
            };

            let output = rlm_core::truncate_with_marker(
                &format!("stdout:\n{}\nstderr:\n{}", exec_result.stdout, exec_result.stderr),
                STDOUT_STDERR_CAP,
            );
            self.record_step(&mut trace, TraceStep {
                step_type: TraceStepType::CodeOutput,
                content: output.clone(),
                iteration,
                timestamp: elapsed_secs(start),
                tokens_used: None,
                duration_ms: Some(exec_duration_ms),
            });
            messages.push(Message::user(output));

            if let Some(final_outcome) = exec_result.r#final {
                let answer = match final_outcome {
                    FinalOutcome::Answer(answer) => answer,
                    FinalOutcome::Var { value, .. } => value,
                };
                self.record_step(&mut trace, TraceStep {
                    step_type: TraceStepType::FinalAnswer,
                    content: answer.clone(),
                    iteration,
                    timestamp: elapsed_secs(start),
                    tokens_used: None,
                    duration_ms: None,
                });
                final_answer = Some(answer);
                break StopReason::Final;
            }

            if !executor.is_alive() {
                if let Some(pool) = &self.pool {
                    pool.discard(executor).await;
                    executor = match pool.acquire().await {
                        Ok(fresh) => fresh,
                        Err(error) => {
                            trace.finish(TraceStatus::Error, token_usage);
                            return Err(error.into());
                        }
                    };
                } else {
                    break StopReason::ExecutorDied;
                }
            }

            if iteration + 1 == self.config.max_iterations {
                break StopReason::MaxIterations;
            }
            iteration += 1;
        };

        let answer = final_answer.unwrap_or_else(|| synthetic_answer(outcome));

        let verification = if matches!(outcome, StopReason::Final) && self.config.verify_citations {
            self.run_mechanical_verification(&mut executor, &answer, iteration, elapsed_secs(start), &mut trace).await
        } else {
            None
        };

        let semantic_verification = if matches!(outcome, StopReason::Final) && self.config.verify {
            self.run_semantic_verification(&answer, &documents, &context.model_id, iteration, elapsed_secs(start), &mut trace).await
        } else {
            None
        };

        let still_alive = executor.is_alive();
        if still_alive {
            let _ = executor.reset_namespace(self.config.sandbox.execute_timeout()).await;
        }
        self.release_or_stop(executor, !still_alive).await;

        trace.finish(TraceStatus::Success, token_usage);
        enforce_retention(trace_dir, self.config.max_traces_per_project);

        Ok(QueryResult {
            answer,
            stop_reason: outcome,
            token_usage,
            execution_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            verification,
            semantic_verification,
        })
    }

    async fn acquire_executor(&self) -> Result<SandboxExecutor, EngineError> {
        match &self.pool {
            Some(pool) => Ok(pool.acquire().await?),
            None => {
                let mut executor = SandboxExecutor::new(SandboxSettings::new(&self.config.sandbox.image));
                executor.start().await?;
                Ok(executor)
            }
        }
    }

    async fn release_or_stop(&self, mut executor: SandboxExecutor, broken: bool) {
        match (&self.pool, broken) {
            (Some(pool), true) => {
                executor.stop().await;
                pool.discard(executor).await;
            }
            (Some(pool), false) => pool.release(executor).await,
            (None, _) => executor.stop().await,
        }
    }

    async fn run_mechanical_verification(
        &self,
        executor: &mut SandboxExecutor,
        answer: &str,
        iteration: u32,
        timestamp: f64,
        trace: &mut TraceWriter,
    ) -> Option<rlm_types::VerificationResult> {
        let code = build_verification_code(answer);
        let record_error = |this: &Self, trace: &mut TraceWriter, content: String| {
            this.record_step(trace, TraceStep {
                step_type: TraceStepType::Verification,
                content,
                iteration,
                timestamp,
                tokens_used: None,
                duration_ms: None,
            });
        };
        match executor.execute(&code, self.config.sandbox.execute_timeout(), NoOpHandler).await {
            Ok(result) if !result.is_error() => match parse_verification_output(&result.stdout) {
                Ok(verification) => Some(verification),
                Err(error) => {
                    record_error(self, trace, format!("verification parse error: {error}"));
                    None
                }
            },
            Ok(result) => {
                record_error(self, trace, format!("verification execution error: {}", result.error.unwrap_or_default()));
                None
            }
            Err(error) => {
                record_error(self, trace, format!("verification execution error: {error}"));
                None
            }
        }
    }

    async fn run_semantic_verification(
        &self,
        answer: &str,
        documents: &[Document],
        model_id: &str,
        iteration: u32,
        timestamp: f64,
        trace: &mut TraceWriter,
    ) -> Option<rlm_types::SemanticVerificationReport> {
        let model = Arc::clone(&self.model);
        let model_id = model_id.to_string();
        let result = semantic_verify::run(&self.prompts, answer, documents, |prompt| {
            let model = Arc::clone(&model);
            let model_id = model_id.clone();
            async move {
                let messages = vec![Message::user(prompt)];
                model.complete(&messages, &model_id).await.ok().map(|response| response.content)
            }
        })
        .await;

        if result.is_none() {
            self.record_step(trace, TraceStep {
                step_type: TraceStepType::SemanticVerification,
                content: "semantic verification failed to parse".to_string(),
                iteration,
                timestamp,
                tokens_used: None,
                duration_ms: None,
            });
        }
        result
    }
}

fn elapsed_secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

fn synthetic_answer(reason: StopReason) -> String {
    match reason {
        StopReason::MaxIterations => "max iterations exceeded".to_string(),
        StopReason::ExecutorDied => "the sandbox executor died and could not be recovered".to_string(),
        StopReason::Error | StopReason::Final => String::new(),
    }
}

struct NoOpHandler;

impl QueryHandler for NoOpHandler {
    async fn handle(&mut self, _instruction: &str, _content: &str) -> Result<String, ExecutorError> {
        Err(ExecutorError::Protocol("llm_query is not available during verification".to_string()))
    }
}

struct SubcallHandler<'a, M: ModelClient> {
    model: &'a Arc<M>,
    prompts: &'a PromptSet,
    model_id: &'a str,
    max_chars: usize,
    tokens: &'a mut TokenUsage,
    trace: &'a mut TraceWriter,
    progress: Option<&'a UnboundedSender<TraceStep>>,
    iteration: u32,
    start: Instant,
}

impl<M: ModelClient> QueryHandler for SubcallHandler<'_, M> {
    async fn handle(&mut self, instruction: &str, content: &str) -> Result<String, ExecutorError> {
        let actual = content.chars().count();
        if actual > self.max_chars {
            return Err(ExecutorError::Protocol(
                SubcallContentError { actual, limit: self.max_chars }.to_string(),
            ));
        }
        let prompt = self.prompts.render_subcall(instruction, content);
        let messages = vec![Message::user(prompt)];
        let response = self
            .model
            .complete(&messages, self.model_id)
            .await
            .map_err(|error| ExecutorError::Protocol(error.to_string()))?;
        self.tokens.add(TokenUsage {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        });
        let step = TraceStep {
            step_type: TraceStepType::CodeOutput,
            content: response.content.clone(),
            iteration: self.iteration,
            timestamp: elapsed_secs(self.start),
            tokens_used: Some(response.total_tokens()),
            duration_ms: None,
        };
        if let Some(tx) = self.progress {
            let _ = tx.send(step.clone());
        }
        self.trace.write_step(step);
        Ok(response.content)
    }
}
