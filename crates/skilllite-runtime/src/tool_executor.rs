//! Dispatch and safety layer mediating local vs. remote tool execution,
//! confirmation gating, JSON-argument validation, and per-tool metrics.

use crate::context_engine::ContextEngine;
use crate::message::{ToolCall, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Events the tool executor emits while dispatching one tool call. These
/// are forwarded verbatim into the agent loop's `AgentEvent` stream.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    ConfirmationRequired {
        tool_name: String,
        tool_id: String,
        arguments: String,
    },
    Start {
        tool_name: String,
        tool_id: String,
    },
    Done {
        tool_name: String,
        tool_id: String,
        confirmed: bool,
        result: Option<ToolResult>,
        arguments: Option<String>,
    },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn requires_confirmation(&self) -> bool;
    async fn call(&self, arguments: Value) -> ToolResult;
}

/// `(tool_name, tool_id, arguments) -> allow?` — absent means "default to
/// deny" (§4.3 step 3).
pub type ConfirmationCallback = dyn Fn(&str, &str, &str) -> bool + Send + Sync;

#[derive(Clone)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub url: String,
    pub instance_id: String,
}

impl RemoteConfig {
    /// Remote is used only when all of {enabled, url, instance_id} are
    /// configured; otherwise local.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.url.is_empty() && !self.instance_id.is_empty()
    }
}

pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    confirm: Option<Arc<ConfirmationCallback>>,
    yolo_mode: bool,
    remote: Option<RemoteConfig>,
    http: reqwest::Client,
}

impl ToolExecutor {
    pub fn new(yolo_mode: bool, remote: Option<RemoteConfig>) -> Self {
        Self {
            tools: HashMap::new(),
            confirm: None,
            yolo_mode,
            remote,
            http: reqwest::Client::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn set_confirmation_callback(&mut self, cb: Arc<ConfirmationCallback>) {
        self.confirm = Some(cb);
    }

    /// Dispatch one tool call, side-effecting `ctx` with the tool-result
    /// message, and return the sequence of events produced along the way.
    pub async fn execute_tool_call(
        &self,
        call: &ToolCall,
        ctx: &ContextEngine,
        prompt_metrics: &crate::metrics::PromptMetrics,
    ) -> Vec<ToolEvent> {
        let mut events = Vec::new();
        let name = &call.function.name;
        let id = &call.id;

        // 1. Look up the tool by name.
        let Some(tool) = self.tools.get(name).cloned() else {
            let result = ToolResult::error(format!("Tool not found: {name}"));
            ctx.append_tool_result(id, &result.content, false, Some(name.clone()), None, None);
            events.push(ToolEvent::Done {
                tool_name: name.clone(),
                tool_id: id.clone(),
                confirmed: false,
                result: Some(result),
                arguments: None,
            });
            return events;
        };

        // 2. Parse arguments as JSON.
        let parsed: Result<Value, _> = serde_json::from_str(&call.function.arguments);
        let arguments = match parsed {
            Ok(v) => v,
            Err(_) => {
                // No tool-result message is appended here: sanitization
                // replaces the need for one.
                ctx.sanitize_invalid_tool_call(id);
                events.push(ToolEvent::Done {
                    tool_name: name.clone(),
                    tool_id: id.clone(),
                    confirmed: false,
                    result: None,
                    arguments: None,
                });
                return events;
            }
        };

        // 3. Confirmation gate.
        if tool.requires_confirmation() && !self.yolo_mode {
            events.push(ToolEvent::ConfirmationRequired {
                tool_name: name.clone(),
                tool_id: id.clone(),
                arguments: call.function.arguments.clone(),
            });

            let allowed = match &self.confirm {
                Some(cb) => cb(name, id, &call.function.arguments),
                None => false,
            };

            if !allowed {
                let result = ToolResult::with_display(
                    "rejected by user",
                    "rejected by user",
                );
                ctx.append_tool_result(id, &result.content, false, Some(name.clone()), Some(call.function.arguments.clone()), None);
                events.push(ToolEvent::Done {
                    tool_name: name.clone(),
                    tool_id: id.clone(),
                    confirmed: false,
                    result: Some(result),
                    arguments: Some(call.function.arguments.clone()),
                });
                return events;
            }
        }

        // 5. Execute.
        events.push(ToolEvent::Start {
            tool_name: name.clone(),
            tool_id: id.clone(),
        });

        let start = Instant::now();
        let result = if self.remote.as_ref().is_some_and(|r| r.is_active()) {
            self.execute_remote(name, &arguments).await
        } else {
            tool.call(arguments).await
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let success = result.is_success();

        ctx.append_tool_result(
            id,
            &result.content,
            success,
            Some(name.clone()),
            Some(call.function.arguments.clone()),
            Some(duration_ms),
        );
        prompt_metrics.record_tool_call(
            name.clone(),
            id.clone(),
            call.function.arguments.clone(),
            duration_ms,
            success,
            if success { None } else { Some(result.content.clone()) },
        );

        events.push(ToolEvent::Done {
            tool_name: name.clone(),
            tool_id: id.clone(),
            confirmed: true,
            result: Some(result),
            arguments: Some(call.function.arguments.clone()),
        });
        events
    }

    async fn execute_remote(&self, tool_name: &str, arguments: &Value) -> ToolResult {
        let Some(remote) = &self.remote else {
            return ToolResult::error("remote executor not configured");
        };
        let body = serde_json::json!({
            "instance_id": remote.instance_id,
            "toolName": tool_name,
            "toolArgs": arguments,
        });

        let response = match self.http.post(&remote.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return ToolResult::error("remote tool call timed out"),
            Err(e) if e.is_connect() => {
                return ToolResult::error(format!("could not connect to remote tool service: {e}"))
            }
            Err(e) => return ToolResult::error(format!("remote tool call failed: {e}")),
        };

        if !response.status().is_success() {
            return ToolResult::error(format!("remote tool service returned {}", response.status()));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("invalid JSON from remote tool service: {e}")),
        };

        let Some(inner) = body.get("response") else {
            return ToolResult::error("remote tool service response missing 'response' field");
        };

        let success = inner.get("success").and_then(Value::as_bool).unwrap_or(false);
        let result_text = inner
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if success {
            ToolResult::ok(result_text)
        } else {
            ToolResult::error(result_text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FunctionCall, ToolCallKind};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn requires_confirmation(&self) -> bool {
            false
        }
        async fn call(&self, arguments: Value) -> ToolResult {
            ToolResult::ok(arguments.to_string())
        }
    }

    struct ConfirmTool;

    #[async_trait]
    impl Tool for ConfirmTool {
        fn name(&self) -> &str {
            "dangerous"
        }
        fn requires_confirmation(&self) -> bool {
            true
        }
        async fn call(&self, _arguments: Value) -> ToolResult {
            ToolResult::ok("done")
        }
    }

    fn call(name: &str, id: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    fn ctx() -> ContextEngine {
        ContextEngine::new("sys", "/tmp/ws", vec!["echo".into()], None)
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let executor = ToolExecutor::new(false, None);
        let ctx = ctx();
        let metrics = crate::metrics::PromptMetrics::default();
        let events = executor
            .execute_tool_call(&call("ghost", "tc_1", "{}"), &ctx, &metrics)
            .await;
        assert!(matches!(events.last(), Some(ToolEvent::Done { confirmed: false, .. })));
    }

    #[tokio::test]
    async fn invalid_json_triggers_sanitization_not_tool_result() {
        let mut executor = ToolExecutor::new(false, None);
        executor.register(Arc::new(EchoTool));
        let ctx = ctx();
        ctx.append_user_message(crate::message::Content::text("go"));
        let bad_call = call("echo", "tc_1", "{not json");
        ctx.append_assistant_message(String::new(), vec![bad_call.clone()], None, None);
        let metrics = crate::metrics::PromptMetrics::default();
        let events = executor.execute_tool_call(&bad_call, &ctx, &metrics).await;
        assert!(matches!(events.last(), Some(ToolEvent::Done { result: None, .. })));
        let messages = ctx.messages_snapshot();
        assert!(messages.iter().rfind(|m| m.role == crate::message::Role::Assistant).unwrap().tool_calls.is_none());
    }

    #[tokio::test]
    async fn confirmation_denied_without_callback_defaults_to_deny() {
        let mut executor = ToolExecutor::new(false, None);
        executor.register(Arc::new(ConfirmTool));
        let ctx = ctx();
        let metrics = crate::metrics::PromptMetrics::default();
        let events = executor
            .execute_tool_call(&call("dangerous", "tc_1", "{}"), &ctx, &metrics)
            .await;
        assert!(matches!(
            events.last(),
            Some(ToolEvent::Done { confirmed: false, result: Some(r), .. }) if r.display.contains("rejected")
        ));
    }

    #[tokio::test]
    async fn yolo_mode_bypasses_confirmation() {
        let mut executor = ToolExecutor::new(true, None);
        executor.register(Arc::new(ConfirmTool));
        let ctx = ctx();
        let metrics = crate::metrics::PromptMetrics::default();
        let events = executor
            .execute_tool_call(&call("dangerous", "tc_1", "{}"), &ctx, &metrics)
            .await;
        assert!(matches!(events.last(), Some(ToolEvent::Done { confirmed: true, .. })));
    }

    #[tokio::test]
    async fn successful_call_appends_tool_result_with_duration() {
        let mut executor = ToolExecutor::new(false, None);
        executor.register(Arc::new(EchoTool));
        let ctx = ctx();
        let metrics = crate::metrics::PromptMetrics::default();
        executor.execute_tool_call(&call("echo", "tc_1", "{\"x\":1}"), &ctx, &metrics).await;
        let messages = ctx.messages_snapshot();
        let tool_msg = messages.iter().rfind(|m| m.role == crate::message::Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("tc_1"));
        assert_eq!(metrics.tool_calls.lock().unwrap().len(), 1);
    }
}
