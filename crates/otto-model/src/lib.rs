// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod anthropic;
mod error;
mod mock;
mod openai;
mod provider;
mod registry;
mod sse;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::{
    classify_http_error, classify_wire_error, ErrorEvent, ErrorKind, ProviderError, WireError,
};
pub use mock::{text_script, tool_call_script, MockProvider, ScriptStep, ScriptedProvider};
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, EventStream, Provider, ToolSchema, EVENT_BUFFER};
pub use registry::from_config;
pub use types::{Message, Role, StreamEvent, ToolCall, ToolResult};
