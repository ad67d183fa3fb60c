//! OpenAI (Chat Completions API) client.

use rlm_config::RetryConfig;
use rlm_types::{Message, ModelError, ModelResponse, Role};
use serde_json::json;

use crate::retry::send_with_retry;
use crate::{error_for_status, http_client, network_error, parse_retry_after, read_capped_error_body};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    api_key: String,
    retry_config: RetryConfig,
}

impl OpenAiClient {
    #[must_use]
    pub fn new(api_key: impl Into<String>, retry_config: RetryConfig) -> Self {
        Self {
            api_key: api_key.into(),
            retry_config,
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn build_request_body(messages: &[Message], model_id: &str) -> serde_json::Value {
    let api_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": role_str(m.role), "content": m.content}))
        .collect();

    json!({
        "model": model_id,
        "messages": api_messages,
    })
}

fn parse_response(body: &serde_json::Value) -> Result<ModelResponse, ModelError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ModelError::Permanent("OpenAI response missing message content".into()))?
        .to_string();

    let prompt_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0);

    Ok(ModelResponse {
        content: text,
        prompt_tokens,
        completion_tokens,
    })
}

impl crate::ModelClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
    ) -> Result<ModelResponse, ModelError> {
        let client = http_client();
        let body = build_request_body(messages, model_id);

        send_with_retry(
            &self.retry_config,
            |err, attempt| {
                tracing::debug!(provider = "openai", attempt, "retrying after {err}");
            },
            || async {
                let response = client
                    .post(API_URL)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("content-type", "application/json")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| network_error(&e))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers());
                    let error_text = read_capped_error_body(response).await;
                    return Err(error_for_status(status, retry_after, error_text));
                }

                let payload: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| ModelError::Transient(format!("decoding OpenAI response: {e}")))?;
                parse_response(&payload)
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm_types::Message;

    #[test]
    fn builds_one_message_per_entry_including_system() {
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let body = build_request_body(&messages, "gpt-5.1");
        let api_messages = body["messages"].as_array().unwrap();
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0]["role"].as_str(), Some("system"));
        assert_eq!(api_messages[1]["role"].as_str(), Some("user"));
    }

    #[test]
    fn parses_message_content_and_usage() {
        let payload = json!({
            "choices": [{"message": {"content": "hello there"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let response = parse_response(&payload).unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.prompt_tokens, 10);
        assert_eq!(response.completion_tokens, 5);
    }

    #[test]
    fn missing_choices_is_a_permanent_error() {
        let payload = json!({"choices": [], "usage": {}});
        let err = parse_response(&payload).unwrap_err();
        assert!(matches!(err, ModelError::Permanent(_)));
    }
}
