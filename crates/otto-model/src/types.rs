// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::error::ErrorEvent;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A tool invocation requested by the model.
///
/// The `id` is assigned by the provider and forwarded verbatim; it is the
/// only link between a call and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments conforming to the tool's declared schema.
    pub input: serde_json::Value,
}

/// The outcome of executing one tool call, paired by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One turn in a conversation.
///
/// Exactly one shape is valid per message: plain text (any role),
/// assistant-with-tool-calls (`tool_calls` set, `tool_results` absent), or
/// a tool message carrying results (`tool_results` set, `tool_calls`
/// absent).  The constructors below are the only supported ways to build
/// one, which keeps that invariant out of callers' hands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Assistant turn carrying both streamed text and the tool calls the
    /// model emitted.  `text` may be empty when the model went straight to
    /// tools.
    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        Self {
            role: Role::Assistant,
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_results: None,
        }
    }

    /// Tool message carrying the results of one batch of tool calls, in the
    /// order the calls were executed.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: None,
            tool_calls: None,
            tool_results: Some(results),
        }
    }

    /// Plain text content, or `""` when the message has none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// True when the message carries neither text nor tool calls nor tool
    /// results.  Adapters omit such messages from the wire.
    pub fn is_empty(&self) -> bool {
        self.text().is_empty()
            && self.tool_calls.as_ref().map_or(true, |c| c.is_empty())
            && self.tool_results.as_ref().map_or(true, |r| r.is_empty())
    }
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// One event in the incremental stream a provider (and the runner, which
/// forwards and annotates it) delivers to its consumer.
///
/// Every stream terminates with exactly one `Done` or `Error`.  Tool calls
/// arrive fully assembled: partial argument fragments are buffered inside
/// the adapters and never surface here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { text: String },
    ThinkingDelta { text: String },
    ToolCall { tool_call: ToolCall },
    /// Synthetic event inserted by the runner after executing a tool.
    ToolResult { tool_result: ToolResult },
    Error { error: ErrorEvent },
    Done,
}

impl StreamEvent {
    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn thinking_delta(text: impl Into<String>) -> Self {
        Self::ThinkingDelta { text: text.into() }
    }

    pub fn tool_call(tool_call: ToolCall) -> Self {
        Self::ToolCall { tool_call }
    }

    pub fn tool_result(tool_result: ToolResult) -> Self {
        Self::ToolResult { tool_result }
    }

    pub fn error(error: ErrorEvent) -> Self {
        Self::Error { error }
    }

    /// True for the two terminal event kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
