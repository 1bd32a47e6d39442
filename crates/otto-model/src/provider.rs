// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::{Message, ProviderError, StreamEvent};

/// Buffer size of the per-stream event channel inside each adapter.
pub const EVENT_BUFFER: usize = 128;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A tool definition as presented to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object.
    pub input_schema: serde_json::Value,
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolSchema>,
    /// Maximum tokens in the response.  `None` lets the adapter choose.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.  `None` lets the adapter choose.
    pub temperature: Option<f32>,
    /// System prompt, hoisted or mapped per the backend's convention.
    pub system_prompt: Option<String>,
}

/// Trait every backend adapter implements.
///
/// The returned stream is finite and terminates with exactly one
/// [`StreamEvent::Done`] or [`StreamEvent::Error`].  Adapters run one
/// producer task per outbound stream; firing the cancellation token (or
/// dropping the stream) releases the underlying transport.  Failures that
/// occur before any event is produced are returned as an immediate
/// [`ProviderError`] so the caller can branch on the classification.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used for failover logging and `--provider` selection.
    fn id(&self) -> &str;

    async fn stream(
        &self,
        cancel: CancellationToken,
        req: ChatRequest,
    ) -> Result<EventStream, ProviderError>;
}
