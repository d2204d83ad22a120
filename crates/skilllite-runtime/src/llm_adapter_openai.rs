//! OpenAI-compatible chat-completions transport: the concrete `LlmAdapter`
//! used against GPT/DeepSeek/Qwen/Claude-class endpoints alike, since all of
//! them are reached through the same `/chat/completions` proxy shape here.
//! The Anthropic variant is this same transport with `cache_control`
//! injected into the outgoing message list — not a distinct wire format —
//! toggled by `with_cache_control`.

use crate::llm_adapter::{
    inject_anthropic_cache_control, LlmAdapter, LlmError, LlmResponse, StreamAccumulator, StreamChunk,
    TokenUsage,
};
use crate::message::Message;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct OpenAiAdapter {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    cache_control: bool,
}

impl OpenAiAdapter {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            cache_control: false,
        }
    }

    /// Enable Anthropic-variant cache-control injection on the last
    /// tool-role message (§4.5).
    pub fn with_cache_control(mut self, enabled: bool) -> Self {
        self.cache_control = enabled;
        self
    }

    fn body(&self, messages: &[Message], tools: &[Value], stream: bool) -> Result<Value, LlmError> {
        let serialized: Vec<Value> = if self.cache_control {
            inject_anthropic_cache_control(messages)
        } else {
            let mut out = Vec::with_capacity(messages.len());
            for m in messages {
                out.push(serde_json::to_value(m).map_err(|e| LlmError::InvalidRequest(e.to_string()))?);
            }
            out
        };
        let mut body = json!({
            "model": self.model,
            "messages": serialized,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        Ok(body)
    }

    fn classify_status(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::Authentication,
            404 => LlmError::ModelNotFound(body_text.to_string()),
            408 => LlmError::Timeout,
            429 => LlmError::RateLimit { retry_after: None },
            400 if is_context_overflow(body_text) => LlmError::ContextLengthExceeded,
            400 => LlmError::InvalidRequest(body_text.to_string()),
            _ => LlmError::ApiError(format!("{status}: {body_text}")),
        }
    }
}

/// Ported check for the handful of phrasings providers use for a
/// token-budget rejection, since the status code alone doesn't distinguish
/// it from any other 400.
fn is_context_overflow(body_text: &str) -> bool {
    let lower = body_text.to_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("token limit")
        || lower.contains("context window")
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn generate(&self, messages: &[Message], tools: &[Value]) -> Result<LlmResponse, LlmError> {
        let body = self.body(messages, tools, false)?;
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { LlmError::ApiError(e.to_string()) })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let parsed: Value = resp.json().await.map_err(|e| LlmError::ApiError(e.to_string()))?;
        let choice = parsed["choices"].get(0).cloned().unwrap_or(Value::Null);
        let message = &choice["message"];
        let content = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = message["tool_calls"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        let usage = parsed.get("usage").map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
            cache_creation_tokens: u["cache_creation_input_tokens"].as_u64().unwrap_or(0),
            cache_read_tokens: u["cache_read_input_tokens"].as_u64().unwrap_or(0),
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
            usage,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: &[Value],
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<LlmResponse, LlmError> {
        let body = self.body(messages, tools, true)?;
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { LlmError::ApiError(e.to_string()) })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let mut acc = StreamAccumulator::new();
        let mut buffer = String::new();
        let mut byte_stream = resp.bytes_stream();
        use futures_util::StreamExt;

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = chunk_result.map_err(|e| LlmError::ApiError(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer = buffer[newline + 1..].to_string();

                if line.is_empty() || line.starts_with(':') || !line.starts_with("data: ") {
                    continue;
                }
                let data = &line[6..];
                if data == "[DONE]" {
                    continue;
                }
                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                if let Some(usage) = parsed.get("usage").filter(|u| !u.is_null()) {
                    let tu = TokenUsage {
                        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
                        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
                        cache_creation_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0),
                        cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
                    };
                    let chunk = StreamChunk::Finish { finish_reason: String::new(), usage: Some(tu) };
                    acc.push(chunk.clone());
                    on_chunk(chunk);
                }

                for choice in parsed["choices"].as_array().cloned().unwrap_or_default() {
                    if let Some(fr) = choice["finish_reason"].as_str() {
                        let chunk = StreamChunk::Finish { finish_reason: fr.to_string(), usage: None };
                        acc.push(chunk.clone());
                        on_chunk(chunk);
                    }
                    let delta = &choice["delta"];
                    if let Some(text) = delta["content"].as_str() {
                        let chunk = StreamChunk::ContentDelta(text.to_string());
                        acc.push(chunk.clone());
                        on_chunk(chunk);
                    }
                    for tc in delta["tool_calls"].as_array().cloned().unwrap_or_default() {
                        let chunk = StreamChunk::ToolCallDelta {
                            index: tc["index"].as_u64().unwrap_or(0) as usize,
                            id: tc["id"].as_str().map(str::to_string),
                            name: tc["function"]["name"].as_str().map(str::to_string),
                            arguments_fragment: tc["function"]["arguments"].as_str().map(str::to_string),
                        };
                        acc.push(chunk.clone());
                        on_chunk(chunk);
                    }
                }
            }
        }

        Ok(acc.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_and_auth_and_context_overflow() {
        assert!(matches!(
            OpenAiAdapter::classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimit { .. }
        ));
        assert!(matches!(
            OpenAiAdapter::classify_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::Authentication
        ));
        assert!(matches!(
            OpenAiAdapter::classify_status(
                reqwest::StatusCode::BAD_REQUEST,
                "Error: maximum context length exceeded"
            ),
            LlmError::ContextLengthExceeded
        ));
    }

    #[test]
    fn builds_non_streaming_body_without_stream_flag() {
        let adapter = OpenAiAdapter::new("https://api.example.com/v1", "key", "gpt-test");
        let messages = vec![Message::user(crate::message::Content::text("hi"))];
        let body = adapter.body(&messages, &[], false).unwrap();
        assert!(body.get("stream").is_none());
        assert_eq!(body["model"], "gpt-test");
    }
}
