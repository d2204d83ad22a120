//! The authoritative message ledger. Owns prompt_id allocation, message
//! append, tool-result insertion, invalid-tool-call sanitization, trajectory
//! writing, and history resume. The agent loop holds a reference only and
//! never mutates messages directly (§3 ownership invariant).

use crate::env_probe;
use crate::message::{Content, FunctionCall, Message, Role, ToolCall, ToolCallKind};
use crate::session::Session;
use crate::trajectory::{now_rfc3339, ConversationSnapshot, TrajectoryEvent, TrajectoryWriter};
use serde_json::Value;
use std::sync::Mutex;
use tracing::warn;

pub struct ContextEngine {
    session: Mutex<Session>,
    writer: Option<TrajectoryWriter>,
    final_response: Mutex<Option<String>>,
}

impl ContextEngine {
    /// Assemble the system prompt from the agent profile and an environment
    /// snapshot, separated by a blank line, and start a fresh session.
    pub fn new(
        agent_system_prompt: &str,
        workspace_path: &str,
        tool_names: Vec<String>,
        writer: Option<TrajectoryWriter>,
    ) -> Self {
        let snapshot = env_probe::snapshot(workspace_path);
        let system_prompt = format!("{}\n\n{}", agent_system_prompt, env_probe::render(&snapshot));
        let mut session = Session::new(workspace_path, system_prompt.clone());
        session.available_tool_names = tool_names;
        session
            .messages
            .push(Message::system(system_prompt));

        if let Some(w) = &writer {
            let _ = w.append_event(&TrajectoryEvent::SessionStart {
                timestamp: now_rfc3339(),
                session_id: session.session_id.clone(),
                workspace_path: workspace_path.to_string(),
            });
        }

        Self {
            session: Mutex::new(session),
            writer,
            final_response: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> String {
        self.session.lock().unwrap().session_id.clone()
    }

    pub fn current_prompt_id(&self) -> String {
        self.session.lock().unwrap().current_prompt_id.clone()
    }

    pub fn current_iteration(&self) -> u32 {
        self.session.lock().unwrap().current_iteration
    }

    pub fn messages_snapshot(&self) -> Vec<Message> {
        self.session.lock().unwrap().messages.clone()
    }

    pub fn available_tool_names(&self) -> Vec<String> {
        self.session.lock().unwrap().available_tool_names.clone()
    }

    pub fn next_iteration(&self) -> u32 {
        self.session.lock().unwrap().next_iteration()
    }

    /// Append a user message, allocate a fresh prompt_id, and reset the
    /// iteration counter.
    pub fn append_user_message(&self, content: Content) -> String {
        let prompt_id = {
            let mut session = self.session.lock().unwrap();
            let prompt_id = session.begin_prompt();
            session.messages.push(Message::user(content.clone()));
            prompt_id
        };

        if let Some(w) = &self.writer {
            let _ = w.append_event(&TrajectoryEvent::UserMessage {
                timestamp: now_rfc3339(),
                session_id: self.session_id(),
                prompt_id: prompt_id.clone(),
                content: serde_json::to_value(&content).unwrap_or(Value::Null),
            });
        }
        prompt_id
    }

    /// Append an assistant message. If `iteration` is `None`, auto-increments
    /// the session's iteration counter. Latches `final_response` when the
    /// message carries no tool calls.
    pub fn append_assistant_message(
        &self,
        content: String,
        tool_calls: Vec<ToolCall>,
        token_usage: Option<Value>,
        iteration: Option<u32>,
    ) {
        let prompt_id = self.current_prompt_id();
        if iteration.is_none() {
            self.next_iteration();
        }

        let has_tool_calls = !tool_calls.is_empty();
        {
            let mut session = self.session.lock().unwrap();
            session.messages.push(Message::assistant(
                Content::text(content.clone()),
                if has_tool_calls {
                    Some(tool_calls.clone())
                } else {
                    None
                },
            ));
        }

        if !has_tool_calls {
            *self.final_response.lock().unwrap() = Some(content.clone());
        }

        if let Some(w) = &self.writer {
            let _ = w.append_event(&TrajectoryEvent::AssistantResponse {
                timestamp: now_rfc3339(),
                session_id: self.session_id(),
                prompt_id,
                content,
                tool_calls,
                extra_data: token_usage.map(|u| serde_json::json!({ "token_usage": u })),
            });
        }
    }

    /// Append a tool-result message and emit its trajectory event.
    pub fn append_tool_result(
        &self,
        tool_call_id: &str,
        content: &str,
        success: bool,
        tool_name: Option<String>,
        arguments: Option<String>,
        duration_ms: Option<u64>,
    ) {
        let prompt_id = self.current_prompt_id();
        {
            let mut session = self.session.lock().unwrap();
            session.messages.push(Message::tool(tool_call_id, content));
        }

        if let Some(w) = &self.writer {
            let _ = w.append_event(&TrajectoryEvent::ToolResult {
                timestamp: now_rfc3339(),
                session_id: self.session_id(),
                prompt_id,
                tool_call_id: tool_call_id.to_string(),
                content: content.to_string(),
                success,
                tool_name,
                arguments,
                duration_ms,
            });
        }
    }

    /// Repair an assistant message carrying a tool call whose JSON arguments
    /// failed to parse (§4.2). Scans backward for the assistant message
    /// containing `offending_id`, rewrites it (clearing `tool_calls`, folding
    /// a human-readable transcription into its content), emits
    /// `tool_call_sanitized`, and appends a retry-instruction user message.
    ///
    /// This preserves the §3 invariant that every tool-call-id has a
    /// matching tool message: after sanitization no tool-call-id expects a
    /// response.
    pub fn sanitize_invalid_tool_call(&self, offending_id: &str) {
        let prompt_id = self.current_prompt_id();
        let (before, after) = {
            let mut session = self.session.lock().unwrap();
            let target_idx = session.messages.iter().rposition(|m| {
                m.role == Role::Assistant
                    && m.tool_calls
                        .as_ref()
                        .is_some_and(|calls| calls.iter().any(|c| c.id == offending_id))
            });

            let Some(idx) = target_idx else {
                warn!(offending_id, "sanitize: no assistant message found with this tool_call id");
                return;
            };

            let before_text = session.messages[idx].content.as_text();
            let calls = session.messages[idx].tool_calls.clone().unwrap_or_default();

            let mut transcription = String::from("\n\nTool calls attempted:");
            for call in &calls {
                transcription.push_str(&format!("\n- Tool: {}\n  ID: {}\n  Arguments: ", call.function.name, call.id));
                if call.id == offending_id {
                    transcription.push_str("<Invalid JSON format>");
                } else {
                    match serde_json::from_str::<Value>(&call.function.arguments) {
                        Ok(v) => transcription.push_str(&serde_json::to_string_pretty(&v).unwrap_or_default()),
                        Err(_) => transcription.push_str(&call.function.arguments),
                    }
                }
            }

            let after_text = format!("{before_text}{transcription}");
            session.messages[idx].content = Content::text(after_text.clone());
            session.messages[idx].tool_calls = None;

            session.messages.push(Message::user(Content::text(retry_instructions())));

            (before_text, after_text)
        };

        if let Some(w) = &self.writer {
            let _ = w.append_event(&TrajectoryEvent::ToolCallSanitized {
                timestamp: now_rfc3339(),
                session_id: self.session_id(),
                prompt_id,
                tool_call_id: offending_id.to_string(),
                before,
                after,
            });
        }
    }

    /// Write the overwritten-each-turn conversation snapshot.
    pub fn write_snapshot(&self) {
        let Some(w) = &self.writer else { return };
        let session = self.session.lock().unwrap();
        let snapshot = ConversationSnapshot {
            timestamp: now_rfc3339(),
            session_id: session.session_id.clone(),
            messages: session.messages.clone(),
            tools: session.available_tool_names.clone(),
        };
        let _ = w.write_snapshot(&snapshot);
    }

    pub fn final_response(&self) -> Option<String> {
        self.final_response.lock().unwrap().clone()
    }

    /// Resume from a previously written conversation snapshot: parse it,
    /// drop the leading system message, rebuild one fresh, and splice the
    /// rest back in. On parse/schema failure, falls back to a fresh session
    /// rather than crashing.
    pub fn resume(
        agent_system_prompt: &str,
        workspace_path: &str,
        tool_names: Vec<String>,
        writer: Option<TrajectoryWriter>,
        snapshot_reader: impl FnOnce() -> anyhow::Result<ConversationSnapshot>,
    ) -> Self {
        let engine = Self::new(agent_system_prompt, workspace_path, tool_names, writer);

        match snapshot_reader() {
            Ok(snapshot) => {
                let mut session = engine.session.lock().unwrap();
                let fresh_system = session.messages.remove(0);
                let history: Vec<Message> = snapshot
                    .messages
                    .into_iter()
                    .filter(|m| m.role != Role::System)
                    .collect();
                session.messages = std::iter::once(fresh_system).chain(history).collect();
                session.conversation_history_resumed = true;
            }
            Err(e) => {
                warn!(error = %e, "resume failed, falling back to fresh session");
            }
        }
        engine
    }
}

fn retry_instructions() -> String {
    "One or more of your tool calls had invalid JSON arguments and could not be executed. \
Please retry with valid JSON: use double quotes for all strings and keys, escape any \
embedded quotes, do not include trailing commas, and make sure every brace and bracket is \
balanced."
        .to_string()
}

/// Helper used by the LLM adapter to reconstitute a `ToolCall` from raw
/// streaming fragments once the index-keyed accumulation buckets are done.
pub fn build_tool_call(id: String, name: String, arguments: String) -> ToolCall {
    ToolCall {
        id,
        kind: ToolCallKind::Function,
        function: FunctionCall { name, arguments },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ContextEngine {
        ContextEngine::new("You are an assistant.", "/tmp/ws", vec!["read_file".into()], None)
    }

    #[test]
    fn begins_with_exactly_one_system_message() {
        let e = engine();
        let messages = e.messages_snapshot();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[test]
    fn prompt_ids_have_no_gaps() {
        let e = engine();
        let p1 = e.append_user_message(Content::text("first"));
        let p2 = e.append_user_message(Content::text("second"));
        assert_eq!(p1, "prompt_001");
        assert_eq!(p2, "prompt_002");
    }

    #[test]
    fn sanitize_clears_tool_calls_and_appends_retry_message() {
        let e = engine();
        e.append_user_message(Content::text("do a thing"));
        let bad_call = build_tool_call("tc_1".into(), "read_file".into(), "{broken".into());
        e.append_assistant_message(String::new(), vec![bad_call], None, None);

        e.sanitize_invalid_tool_call("tc_1");

        let messages = e.messages_snapshot();
        let assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert!(assistant.tool_calls.is_none());
        assert!(assistant.content.as_text().contains("<Invalid JSON format>"));
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::User);
    }

    #[test]
    fn final_response_latches_only_without_tool_calls() {
        let e = engine();
        e.append_user_message(Content::text("hi"));
        let call = build_tool_call("tc_1".into(), "read_file".into(), "{}".into());
        e.append_assistant_message("thinking".into(), vec![call], None, None);
        assert!(e.final_response().is_none());

        e.append_assistant_message("done".into(), vec![], None, None);
        assert_eq!(e.final_response(), Some("done".into()));
    }
}
