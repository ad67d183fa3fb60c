//! Append-only JSONL trace persistence (C10) and export-time redaction (C11).

pub mod cleanup;
pub mod export;
pub mod writer;

pub use cleanup::enforce_retention;
pub use export::export_redacted;
pub use writer::TraceWriter;
