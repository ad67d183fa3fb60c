//! Cross-cutting concerns shared by every other crate in the engine:
//! secret redaction (C11) and small text helpers with no better home.

mod redaction;
mod text;

pub use redaction::{Redactor, default_redactor, redact};
pub use text::truncate_with_marker;
