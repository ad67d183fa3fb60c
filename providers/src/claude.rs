//! Claude (Anthropic Messages API) client.

use rlm_config::RetryConfig;
use rlm_types::{Message, ModelError, ModelResponse, Role};
use serde_json::json;

use crate::retry::send_with_retry;
use crate::{error_for_status, http_client, network_error, parse_retry_after, read_capped_error_body};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

pub struct ClaudeClient {
    api_key: String,
    retry_config: RetryConfig,
}

impl ClaudeClient {
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
    let mut system_blocks: Vec<String> = Vec::new();
    let mut api_messages: Vec<serde_json::Value> = Vec::new();

    for message in messages {
        if message.role == Role::System {
            system_blocks.push(message.content.clone());
        } else {
            api_messages.push(json!({
                "role": role_str(message.role),
                "content": message.content,
            }));
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model_id));
    body.insert("max_tokens".into(), json!(DEFAULT_MAX_OUTPUT_TOKENS));
    body.insert("messages".into(), json!(api_messages));
    if !system_blocks.is_empty() {
        body.insert("system".into(), json!(system_blocks.join("\n\n")));
    }
    serde_json::Value::Object(body)
}

fn parse_response(body: &serde_json::Value) -> Result<ModelResponse, ModelError> {
    let text = body["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|block| block["text"].as_str())
        .ok_or_else(|| ModelError::Permanent("Claude response missing text content".into()))?
        .to_string();

    let prompt_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(ModelResponse {
        content: text,
        prompt_tokens,
        completion_tokens,
    })
}

impl crate::ModelClient for ClaudeClient {
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
                tracing::debug!(provider = "claude", attempt, "retrying after {err}");
            },
            || async {
                let response = client
                    .post(API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", "2023-06-01")
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
                    .map_err(|e| ModelError::Transient(format!("decoding Claude response: {e}")))?;
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
    fn hoists_system_messages_into_a_single_system_field() {
        let messages = vec![
            Message::system("be terse"),
            Message::user("hi"),
        ];
        let body = build_request_body(&messages, "claude-haiku-4-5");
        assert_eq!(body["system"].as_str(), Some("be terse"));
        let api_messages = body["messages"].as_array().unwrap();
        assert_eq!(api_messages.len(), 1);
        assert_eq!(api_messages[0]["role"].as_str(), Some("user"));
    }

    #[test]
    fn parses_text_block_and_usage() {
        let payload = json!({
            "content": [{"type": "text", "text": "hello there"}],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let response = parse_response(&payload).unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.prompt_tokens, 12);
        assert_eq!(response.completion_tokens, 3);
    }

    #[test]
    fn missing_text_block_is_a_permanent_error() {
        let payload = json!({"content": [], "usage": {}});
        let err = parse_response(&payload).unwrap_err();
        assert!(matches!(err, ModelError::Permanent(_)));
    }
}
