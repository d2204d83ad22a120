//! The bounded iterative state machine that interleaves LLM calls with tool
//! executions, emits a structured event stream, handles malformed model
//! output (via the context engine's sanitizer), and terminates on
//! convergence or iteration cap.

use crate::context_engine::ContextEngine;
use crate::llm_adapter::{LlmAdapter, LlmError, StreamAccumulator, StreamChunk};
use crate::message::Content;
use crate::metrics::MetricsCollector;
use crate::tool_executor::{ToolEvent, ToolExecutor};
use std::sync::Arc;

const ITERATION_CAP_SENTINEL: &str = "Maximum iterations reached. The task may not be complete.";

#[derive(Debug, Clone)]
pub enum AgentEvent {
    LlmStart { iteration: u32 },
    LlmChunk { delta: String },
    LlmDone { content: String, has_tool_calls: bool },
    ToolConfirmationRequired { tool_name: String, tool_id: String, arguments: String },
    ToolStart { tool_name: String, tool_id: String },
    ToolDone {
        tool_name: String,
        tool_id: String,
        confirmed: bool,
        result: Option<String>,
        display: Option<String>,
        arguments: Option<String>,
    },
    AgentDone { final_response: String, iterations: u32, session_id: String },
    Error { message: String },
}

pub struct AgentLoop {
    ctx: Arc<ContextEngine>,
    llm: Arc<dyn LlmAdapter>,
    executor: Arc<ToolExecutor>,
    metrics: Arc<MetricsCollector>,
    max_iterations: u32,
    stream: bool,
    model: String,
}

impl AgentLoop {
    pub fn new(
        ctx: Arc<ContextEngine>,
        llm: Arc<dyn LlmAdapter>,
        executor: Arc<ToolExecutor>,
        metrics: Arc<MetricsCollector>,
        max_iterations: u32,
        stream: bool,
        model: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            llm,
            executor,
            metrics,
            max_iterations,
            stream,
            model: model.into(),
        }
    }

    /// `run(user_query)`. Consumes one user query and produces the ordered
    /// sequence of `AgentEvent`s for it. Matches the §4.1 algorithm exactly:
    /// every `llm_chunk` belongs to the most recent `llm_start`; every
    /// `tool_*` triple is nested within a single iteration; `agent_done`
    /// appears last.
    pub async fn run(&self, user_query: Content) -> Vec<AgentEvent> {
        let mut events = Vec::new();

        self.ctx.append_user_message(user_query);
        let prompt_metrics = self.metrics.open_prompt();

        let mut final_response = String::new();
        let mut iterations_run = 0u32;

        for _ in 1..=self.max_iterations {
            let iteration = self.ctx.next_iteration();
            iterations_run = iteration;

            let messages = self.ctx.messages_snapshot();
            let tool_names = self.ctx.available_tool_names();
            let tool_schemas: Vec<serde_json::Value> = tool_names
                .iter()
                .map(|name| serde_json::json!({ "name": name }))
                .collect();

            events.push(AgentEvent::LlmStart { iteration });

            let response = if self.stream {
                let api_tracker = prompt_metrics.start_api_call(self.model.clone());
                let mut accumulator = StreamAccumulator::new();
                let chunk_events = std::sync::Mutex::new(Vec::new());
                let mut on_chunk = |chunk: StreamChunk| {
                    if let StreamChunk::ContentDelta(ref text) = chunk {
                        chunk_events.lock().unwrap().push(text.clone());
                    }
                    accumulator.push(chunk);
                };
                let result = self
                    .llm
                    .generate_stream(&messages, &tool_schemas, &mut on_chunk)
                    .await;
                drop(on_chunk);
                for delta in chunk_events.into_inner().unwrap() {
                    events.push(AgentEvent::LlmChunk { delta });
                }
                match result {
                    Ok(resp) => {
                        let usage = resp.usage.as_ref();
                        api_tracker.finish(
                            true,
                            resp.finish_reason.clone(),
                            usage.map(|u| u.prompt_tokens).unwrap_or(0),
                            usage.map(|u| u.completion_tokens).unwrap_or(0),
                            usage.map(|u| u.cache_creation_tokens).unwrap_or(0),
                            usage.map(|u| u.cache_read_tokens).unwrap_or(0),
                            None,
                        );
                        resp
                    }
                    Err(e) => {
                        api_tracker.finish(false, None, 0, 0, 0, 0, Some(e.to_string()));
                        events.push(AgentEvent::Error { message: e.to_string() });
                        break;
                    }
                }
            } else {
                let api_tracker = prompt_metrics.start_api_call(self.model.clone());
                match self.llm.generate(&messages, &tool_schemas).await {
                    Ok(resp) => {
                        let usage = resp.usage.as_ref();
                        api_tracker.finish(
                            true,
                            resp.finish_reason.clone(),
                            usage.map(|u| u.prompt_tokens).unwrap_or(0),
                            usage.map(|u| u.completion_tokens).unwrap_or(0),
                            usage.map(|u| u.cache_creation_tokens).unwrap_or(0),
                            usage.map(|u| u.cache_read_tokens).unwrap_or(0),
                            None,
                        );
                        resp
                    }
                    Err(e) => {
                        api_tracker.finish(false, None, 0, 0, 0, 0, Some(e.to_string()));
                        events.push(AgentEvent::Error { message: e.to_string() });
                        break;
                    }
                }
            };

            events.push(AgentEvent::LlmDone {
                content: response.content.clone(),
                has_tool_calls: !response.tool_calls.is_empty(),
            });

            let token_usage = response.usage.as_ref().map(|u| {
                serde_json::json!({
                    "prompt": u.prompt_tokens,
                    "completion": u.completion_tokens,
                    "total": u.prompt_tokens + u.completion_tokens,
                    "cache_creation": u.cache_creation_tokens,
                    "cache_read": u.cache_read_tokens,
                })
            });
            self.ctx.append_assistant_message(
                response.content.clone(),
                response.tool_calls.clone(),
                token_usage,
                Some(iteration),
            );
            self.ctx.write_snapshot();

            if response.tool_calls.is_empty() {
                final_response = response.content;
                break;
            }

            for call in &response.tool_calls {
                let tool_events = self
                    .executor
                    .execute_tool_call(call, &self.ctx, &prompt_metrics)
                    .await;
                for te in tool_events {
                    events.push(translate_tool_event(te));
                }
            }
        }

        if final_response.is_empty() && iterations_run >= self.max_iterations {
            final_response = ITERATION_CAP_SENTINEL.to_string();
        }

        events.push(AgentEvent::AgentDone {
            final_response,
            iterations: iterations_run,
            session_id: self.ctx.session_id(),
        });

        events
    }
}

fn translate_tool_event(event: ToolEvent) -> AgentEvent {
    match event {
        ToolEvent::ConfirmationRequired { tool_name, tool_id, arguments } => {
            AgentEvent::ToolConfirmationRequired { tool_name, tool_id, arguments }
        }
        ToolEvent::Start { tool_name, tool_id } => AgentEvent::ToolStart { tool_name, tool_id },
        ToolEvent::Done { tool_name, tool_id, confirmed, result, arguments } => AgentEvent::ToolDone {
            tool_name,
            tool_id,
            confirmed,
            result: result.as_ref().map(|r| r.content.clone()),
            display: result.as_ref().map(|r| r.display.clone()),
            arguments,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::{LlmResponse, TokenUsage};
    use crate::message::{Content, ToolCall};
    use crate::tool_executor::Tool;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedLlm {
        turns: std::sync::Mutex<Vec<LlmResponse>>,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn generate(
            &self,
            _messages: &[crate::message::Message],
            _tools: &[Value],
        ) -> Result<LlmResponse, LlmError> {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Ok(LlmResponse {
                    content: String::new(),
                    tool_calls: vec![],
                    finish_reason: Some("stop".into()),
                    usage: None,
                });
            }
            Ok(turns.remove(0))
        }

        async fn generate_stream(
            &self,
            messages: &[crate::message::Message],
            tools: &[Value],
            _on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
        ) -> Result<LlmResponse, LlmError> {
            self.generate(messages, tools).await
        }
    }

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn requires_confirmation(&self) -> bool {
            false
        }
        async fn call(&self, _arguments: Value) -> crate::message::ToolResult {
            crate::message::ToolResult::ok("done")
        }
    }

    fn tool_call(id: &str) -> ToolCall {
        crate::context_engine::build_tool_call(id.into(), "noop".into(), "{}".into())
    }

    #[tokio::test]
    async fn stops_when_no_tool_calls() {
        let ctx = Arc::new(ContextEngine::new("sys", "/tmp/ws", vec!["noop".into()], None));
        let llm = Arc::new(ScriptedLlm {
            turns: std::sync::Mutex::new(vec![LlmResponse {
                content: "all done".into(),
                tool_calls: vec![],
                finish_reason: Some("stop".into()),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    cache_creation_tokens: 0,
                    cache_read_tokens: 0,
                }),
            }]),
        });
        let mut executor = ToolExecutor::new(true, None);
        executor.register(Arc::new(NoopTool));
        let agent = AgentLoop::new(
            ctx,
            llm,
            Arc::new(executor),
            Arc::new(MetricsCollector::new()),
            10,
            false,
            "test-model",
        );
        let events = agent.run(Content::text("hi")).await;
        match events.last().unwrap() {
            AgentEvent::AgentDone { final_response, iterations, .. } => {
                assert_eq!(final_response, "all done");
                assert_eq!(*iterations, 1);
            }
            other => panic!("unexpected last event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn iteration_cap_emits_sentinel() {
        let ctx = Arc::new(ContextEngine::new("sys", "/tmp/ws", vec!["noop".into()], None));
        let call_count = AtomicU32::new(0);
        let turns: Vec<LlmResponse> = (0..5)
            .map(|i| {
                call_count.fetch_add(1, Ordering::SeqCst);
                LlmResponse {
                    content: String::new(),
                    tool_calls: vec![tool_call(&format!("tc_{i}"))],
                    finish_reason: Some("tool_calls".into()),
                    usage: None,
                }
            })
            .collect();
        let llm = Arc::new(ScriptedLlm {
            turns: std::sync::Mutex::new(turns),
        });
        let mut executor = ToolExecutor::new(true, None);
        executor.register(Arc::new(NoopTool));
        let agent = AgentLoop::new(
            ctx,
            llm,
            Arc::new(executor),
            Arc::new(MetricsCollector::new()),
            2,
            false,
            "test-model",
        );
        let events = agent.run(Content::text("keep going")).await;
        match events.last().unwrap() {
            AgentEvent::AgentDone { final_response, iterations, .. } => {
                assert_eq!(*iterations, 2);
                assert!(final_response.contains("Maximum iterations reached"));
            }
            other => panic!("unexpected last event: {other:?}"),
        }
    }
}
