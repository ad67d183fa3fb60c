//! RLM orchestration engine: the iteration loop, its prompt templates, and
//! the mechanical and semantic verification passes run against a FINAL
//! answer.
//!
//! This crate wires together [`rlm_sandbox`], [`rlm_providers`],
//! [`rlm_trace`] and [`rlm_config`] into one [`Orchestrator::query`] call per
//! question; it owns no I/O setup of its own beyond reading prompt template
//! files and writing trace files.

mod error;
mod mechanical_verify;
mod orchestrator;
mod prompt;
mod semantic_verify;

pub use error::EngineError;
pub use mechanical_verify::{VerificationError, build_verification_code, extract_citation_ids, extract_quotes, parse_verification_output};
pub use orchestrator::{Orchestrator, SubcallContentError, extract_code_blocks};
pub use prompt::{PromptError, PromptSet, format_doc_sizes_list};
pub use semantic_verify::{SemanticVerifyError, gather_cited_documents, parse_verification_response};
