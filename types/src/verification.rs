use serde::{Deserialize, Serialize};

use crate::ids::DocId;

/// A citation to a document index found in an answer (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: DocId,
    pub found: bool,
}

/// A quoted span found in an answer (§3, §4.8).
///
/// `doc_id` is -1 when the quote could not be located in any cited document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub doc_id: DocId,
    pub found: bool,
}

/// Result of mechanical citation verification (§4.8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub citations: Vec<Citation>,
    pub quotes: Vec<Quote>,
}

impl VerificationResult {
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.citations.iter().all(|c| c.found) && self.quotes.iter().all(|q| q.found)
    }
}
