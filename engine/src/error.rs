//! Top-level error taxonomy (C15).
//!
//! Every crate below this one defines its own error enum scoped to its own
//! concerns; this composes them into the one error an orchestrator query
//! can return.

use rlm_config::ConfigError;
use rlm_sandbox::{ExecutorError, PoolError};
use rlm_types::ModelError;
use thiserror::Error;

use crate::mechanical_verify::VerificationError;
use crate::prompt::PromptError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
}
