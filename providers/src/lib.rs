//! Outer-model provider clients.
//!
//! The orchestrator only ever needs one call shape from a model: hand it a
//! message history and a model id, get back a completed response. There is
//! no streaming here — the engine consumes a full turn at a time before it
//! decides what code to run next, so SSE plumbing would buy nothing.

use rlm_types::{Message, ModelError, ModelResponse};

pub mod claude;
pub mod openai;
pub mod retry;

/// A provider capable of completing a non-streaming chat request.
///
/// Implemented directly by [`claude::ClaudeClient`] and
/// [`openai::OpenAiClient`]; callers needing to pick a provider at runtime
/// should match on their own enum rather than reach for dynamic dispatch —
/// there are only ever two of these.
pub trait ModelClient: Send + Sync {
    fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
    ) -> impl std::future::Future<Output = Result<ModelResponse, ModelError>> + Send;
}

/// Connection timeout for API requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Total request timeout. Outer-model calls are bounded by the retry policy
/// on top, so a generous per-attempt timeout is fine here.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Shared HTTP client for all provider requests.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .https_only(true)
            .build()
            .expect("build shared HTTP client")
    })
}

/// Read an error response body, capping size to avoid memory spikes from
/// large or malicious payloads.
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let capped = &bytes[..bytes.len().min(MAX_ERROR_BODY_BYTES)];
            let text = String::from_utf8_lossy(capped);
            if bytes.len() > MAX_ERROR_BODY_BYTES {
                format!("{text}...(truncated)")
            } else {
                text.into_owned()
            }
        }
        Err(e) => format!("<failed to read error body: {e}>"),
    }
}

/// Classify an HTTP status code the way the outer retry policy expects:
/// 429 and 5xx are transient, everything else that isn't 2xx is permanent.
pub(crate) fn error_for_status(status: reqwest::StatusCode, retry_after: Option<f64>, body: String) -> ModelError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimit {
            message: format!("HTTP {status}: {body}"),
            retry_after,
        }
    } else if status.is_server_error() {
        ModelError::Transient(format!("HTTP {status}: {body}"))
    } else {
        ModelError::Permanent(format!("HTTP {status}: {body}"))
    }
}

/// Parse the server-suggested backoff out of a `Retry-After` header, if
/// present. Only the delay-seconds form is handled; an HTTP-date value
/// parses as `None` rather than being interpreted.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
}

pub(crate) fn network_error(err: &reqwest::Error) -> ModelError {
    ModelError::Transient(format!("request failed: {err}"))
}
