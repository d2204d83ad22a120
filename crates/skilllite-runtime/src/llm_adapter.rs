//! The LLM adapter's behavioral contract: streaming chunk reassembly, retry
//! classification, and Anthropic cache-control injection. The concrete
//! wire transport (OpenAI vs. Anthropic chat-completions HTTP calls) is an
//! external collaborator; this module defines the trait and the
//! provider-agnostic logic load-bearing for the agent loop.

use crate::message::{Message, Role, ToolCall};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// One piece of a streamed response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    ContentDelta(String),
    /// Index-keyed so fragments delivered out of order (or interleaved
    /// across several in-flight tool calls) can still be bucketed.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: Option<String>,
    },
    Finish {
        finish_reason: String,
        usage: Option<TokenUsage>,
    },
}

/// The provider's native exceptions, mapped to this taxonomy (§4.5).
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimit { retry_after: Option<f64> },
    #[error("context length exceeded")]
    ContextLengthExceeded,
    #[error("authentication failed")]
    Authentication,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Timeout | LlmError::RateLimit { .. })
    }
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<LlmResponse, LlmError>;

    /// Stream chunks to `on_chunk` as they arrive; returns the reassembled
    /// final response. Implementations drive their transport's event loop
    /// and forward each delta through the callback in arrival order.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: &[Value],
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<LlmResponse, LlmError>;
}

/// Accumulates streaming deltas into a final `LlmResponse`. One instance per
/// `llm_call`; fed chunk-by-chunk, then finalized.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::ContentDelta(text) => self.content.push_str(&text),
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments_fragment,
            } => {
                if self.tool_calls.len() <= index {
                    self.tool_calls.resize(index + 1, PartialToolCall::default());
                }
                let entry = &mut self.tool_calls[index];
                if let Some(id) = id {
                    entry.id.push_str(&id);
                }
                if let Some(name) = name {
                    entry.name.push_str(&name);
                }
                if let Some(frag) = arguments_fragment {
                    entry.arguments.push_str(&frag);
                }
            }
            StreamChunk::Finish {
                finish_reason,
                usage,
            } => {
                self.finish_reason = Some(finish_reason);
                // Guard against zero-token spurious usage chunks (§4.5):
                // only accept a usage report that actually carries tokens.
                if let Some(u) = usage {
                    if u.prompt_tokens > 0 || u.completion_tokens > 0 {
                        self.usage = Some(u);
                    }
                }
            }
        }
    }

    pub fn finish(self) -> LlmResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|t| !t.id.is_empty() || !t.name.is_empty())
            .map(|t| crate::context_engine::build_tool_call(t.id, t.name, t.arguments))
            .collect();
        LlmResponse {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Up to 3 attempts; retryable errors only; `retry_after` if the error
/// carries one, else exponential backoff `initial_delay * base^attempt`.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<f64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs_f64(secs.max(0.0));
        }
        let secs = self.initial_delay.as_secs_f64() * self.base.powi(attempt as i32);
        Duration::from_secs_f64(secs)
    }

    /// Drive `attempt_fn` under the retry policy. Non-retryable errors
    /// propagate immediately.
    pub async fn run<F, Fut, T>(&self, mut attempt_fn: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match attempt_fn().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let retry_after = match &e {
                        LlmError::RateLimit { retry_after } => *retry_after,
                        _ => None,
                    };
                    tokio::time::sleep(self.delay_for_attempt(attempt, retry_after)).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(LlmError::ApiError("exhausted retries".into())))
    }
}

/// Anthropic cache-control injection: if the last message is a tool-role
/// message, annotate it with `{type: "ephemeral"}` so the provider caches
/// the long accumulated context. Fresh user queries remain uncached.
/// Implemented as a top-level `cache_control` field addition, matching the
/// currently active upstream branch (§9 design note on the two-branch
/// divergence).
pub fn inject_anthropic_cache_control(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = messages
        .iter()
        .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
        .collect();
    if let Some(last) = messages.last() {
        if last.role == Role::Tool {
            if let Some(obj) = out.last_mut().and_then(|v| v.as_object_mut()) {
                obj.insert(
                    "cache_control".to_string(),
                    serde_json::json!({ "type": "ephemeral" }),
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Content;

    #[test]
    fn accumulates_content_in_arrival_order() {
        let mut acc = StreamAccumulator::new();
        acc.push(StreamChunk::ContentDelta("Hello".into()));
        acc.push(StreamChunk::ContentDelta(", world".into()));
        let resp = acc.finish();
        assert_eq!(resp.content, "Hello, world");
    }

    #[test]
    fn buckets_tool_call_deltas_by_index() {
        let mut acc = StreamAccumulator::new();
        acc.push(StreamChunk::ToolCallDelta {
            index: 0,
            id: Some("tc_".into()),
            name: Some("read_".into()),
            arguments_fragment: Some("{\"pa".into()),
        });
        acc.push(StreamChunk::ToolCallDelta {
            index: 0,
            id: Some("1".into()),
            name: Some("file".into()),
            arguments_fragment: Some("th\": 1}".into()),
        });
        let resp = acc.finish();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "tc_1");
        assert_eq!(resp.tool_calls[0].function.name, "read_file");
        assert_eq!(resp.tool_calls[0].function.arguments, "{\"path\": 1}");
    }

    #[test]
    fn zero_token_usage_chunk_is_ignored() {
        let mut acc = StreamAccumulator::new();
        acc.push(StreamChunk::Finish {
            finish_reason: "tool_calls".into(),
            usage: Some(TokenUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
            }),
        });
        acc.push(StreamChunk::Finish {
            finish_reason: "stop".into(),
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
            }),
        });
        let resp = acc.finish();
        assert_eq!(resp.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn non_retryable_errors_are_classified() {
        assert!(!LlmError::ContextLengthExceeded.is_retryable());
        assert!(!LlmError::Authentication.is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::RateLimit { retry_after: Some(0.1) }.is_retryable());
    }

    #[test]
    fn cache_control_only_injected_after_tool_message() {
        let messages = vec![Message::system("sys"), Message::tool("tc_1", "result")];
        let out = inject_anthropic_cache_control(&messages);
        assert!(out[1].get("cache_control").is_some());

        let messages2 = vec![Message::system("sys"), Message::user(Content::text("hi"))];
        let out2 = inject_anthropic_cache_control(&messages2);
        assert!(out2[1].get("cache_control").is_none());
    }

    #[tokio::test]
    async fn retry_policy_retries_then_succeeds() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            base: 1.0,
        };
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(LlmError::RateLimit { retry_after: Some(0.001) })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
