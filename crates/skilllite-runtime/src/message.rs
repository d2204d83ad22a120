//! The message ledger's data model: `Message`, its content sum type, and the
//! tool-call/tool-definition/tool-result shapes that flow between the LLM
//! adapter, the context engine, and the tool executor.

use serde::{Deserialize, Serialize};

/// One block of multimodal message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageRef },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRef {
    pub url: String,
}

/// Message content: either a plain string or an ordered list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<Block>),
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Best-effort flattening to a single string, for estimating token counts
    /// and for transcribing sanitized tool calls back into message text.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text } => Some(text.clone()),
                    Block::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A model-issued request to invoke a named tool. Arguments are kept as the
/// raw JSON text the model produced — possibly invalid — so sanitization
/// (see `context_engine::sanitize_invalid_tool_call`) can repair it without
/// having already failed to parse it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text. May be malformed; never eagerly parsed.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the context engine's message ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present only on assistant messages that requested tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present only on tool-role messages; must match a `ToolCall.id` from a
    /// preceding assistant message unless the assistant message was
    /// sanitized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::text(content),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: Content) -> Self {
        Self {
            role: Role::User,
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Content, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Content::text(content),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// One parameter of a `ToolDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<String>>,
}

/// Declares a callable tool and whether invoking it must be confirmed by the
/// user before it runs (see `tool_executor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub requires_confirmation: bool,
}

impl ToolDefinition {
    /// Serialize into the OpenAI-compatible function-schema shape the LLM
    /// adapter sends on the wire.
    pub fn to_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({
                "type": p.kind,
                "description": p.description,
            });
            if let Some(values) = &p.r#enum {
                prop["enum"] = serde_json::json!(values);
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(p.name.clone());
            }
        }
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// The outcome of one tool invocation. `display` defaults to `content` when
/// a tool doesn't produce a separate human-facing summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub display: String,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            display: content.clone(),
            content,
        }
    }

    pub fn with_display(content: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            display: display.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: format!("Error: {message}"),
            display: format!("\u{274c} {message}"),
        }
    }

    /// Success heuristic used by the tool executor: a result is a failure if
    /// its content starts with `"Error:"` or its display carries the `\u{274c}`
    /// marker. Stringly-typed by design — see the open question in the
    /// executor module.
    pub fn is_success(&self) -> bool {
        !self.content.starts_with("Error:") && !self.display.contains('\u{274c}')
    }
}

/// Estimate a token count as chars/4, the same coarse heuristic the
/// workspace toolkit and context engine use for their size guards.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count() / 4
}
