//! Core domain types for the RLM engine.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the engine.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod document;
mod ids;
mod message;
mod model_error;
mod query;
mod sandbox;
mod semantic;
mod token_usage;
mod trace;
mod verification;

pub use document::{CODE_EXTENSIONS, ContentType, Document, detect_content_type, is_code_document};
pub use ids::{DocId, TraceId};
pub use message::{Message, ModelResponse, Role};
pub use model_error::ModelError;
pub use query::{QueryContext, QueryResult, StopReason};
pub use sandbox::{ExecutionResult, FinalOutcome};
pub use semantic::{Confidence, FindingVerification, SemanticVerificationReport};
pub use token_usage::TokenUsage;
pub use trace::{TraceHeader, TraceStatus, TraceStep, TraceStepType, TraceSummary};
pub use verification::{Citation, Quote, VerificationResult};
