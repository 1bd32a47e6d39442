// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::provider::{ChatRequest, EventStream, Provider};
use crate::{ProviderError, Role, StreamEvent, ToolCall};

/// Deterministic mock provider for tests and offline runs.  Echoes the
/// last user message back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _cancel: CancellationToken,
        req: ChatRequest,
    ) -> Result<EventStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text().to_string())
            .unwrap_or_else(|| "[no input]".to_string());

        let events = vec![
            StreamEvent::text_delta(format!("MOCK: {reply}")),
            StreamEvent::Done,
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted provider call: either a sequence of stream events or an
/// immediate classified failure.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Events(Vec<StreamEvent>),
    Fail(ProviderError),
}

/// A pre-scripted provider.  Each call to `stream` pops the next step from
/// the front of the queue, so tests can specify exact event sequences
/// (including tool calls and classified failures) without network access.
pub struct ScriptedProvider {
    id: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    calls: Arc<AtomicUsize>,
    /// Returned for every call after the scripted steps are exhausted.
    /// `None` falls back to a sentinel text reply.
    fail_fallback: Option<ProviderError>,
    /// The last `ChatRequest` seen, for tests that inspect what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        Self {
            id: id.into(),
            steps: Mutex::new(steps.into()),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_fallback: None,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that returns a single text reply.
    pub fn always_text(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::new(id, vec![ScriptStep::Events(text_script(reply))])
    }

    /// Provider that emits a tool call on the first call and a text reply
    /// on the second.
    pub fn tool_then_text(
        id: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            vec![
                ScriptStep::Events(tool_call_script(call_id, tool_name, input)),
                ScriptStep::Events(text_script(final_text)),
            ],
        )
    }

    /// Provider whose every call fails immediately with `err`.
    pub fn always_fail(id: impl Into<String>, err: ProviderError) -> Self {
        let mut p = Self::new(id, vec![]);
        p.fail_fallback = Some(err);
        p
    }

    /// Provider that fails once with `err`, then returns a text reply.
    pub fn fail_then_text(
        id: impl Into<String>,
        err: ProviderError,
        reply: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            vec![
                ScriptStep::Fail(err),
                ScriptStep::Events(text_script(reply)),
            ],
        )
    }

    /// How many times `stream` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared counter handle, for tests that move the provider into a
    /// runner before asserting.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

/// Convenience: a script of one text delta followed by `Done`.
pub fn text_script(text: impl Into<String>) -> Vec<StreamEvent> {
    vec![StreamEvent::text_delta(text), StreamEvent::Done]
}

/// Convenience: a script of one assembled tool call followed by `Done`.
pub fn tool_call_script(
    call_id: impl Into<String>,
    tool_name: impl Into<String>,
    input: serde_json::Value,
) -> Vec<StreamEvent> {
    vec![
        StreamEvent::tool_call(ToolCall {
            id: call_id.into(),
            name: tool_name.into(),
            input,
        }),
        StreamEvent::Done,
    ]
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        _cancel: CancellationToken,
        req: ChatRequest,
    ) -> Result<EventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req);

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Events(events)) => Ok(Box::pin(stream::iter(events))),
            None => match &self.fail_fallback {
                Some(err) => Err(err.clone()),
                // Default fallback when all scripts are consumed.
                None => Ok(Box::pin(stream::iter(text_script("[no more scripts]")))),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::Message;

    fn req() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    async fn collect(mut s: EventStream) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = s.next().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let events = collect(p.stream(CancellationToken::new(), req()).await.unwrap()).await;
        assert!(
            matches!(&events[0], StreamEvent::TextDelta { text } if text.contains("MOCK: hi"))
        );
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn scripted_pops_steps_in_order() {
        let p = ScriptedProvider::tool_then_text(
            "scripted",
            "c1",
            "glob",
            serde_json::json!({"pattern": "*.go"}),
            "Done!",
        );

        let first = collect(p.stream(CancellationToken::new(), req()).await.unwrap()).await;
        assert!(first
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCall { tool_call } if tool_call.name == "glob")));

        let second = collect(p.stream(CancellationToken::new(), req()).await.unwrap()).await;
        assert!(second
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { text } if text == "Done!")));
        assert_eq!(p.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_fail_step_returns_immediate_error() {
        let p = ScriptedProvider::fail_then_text(
            "flaky",
            ProviderError::ContextOverflow("too big".into()),
            "ok",
        );
        let err = p.stream(CancellationToken::new(), req()).await.err().unwrap();
        assert!(matches!(err, ProviderError::ContextOverflow(_)));

        let events = collect(p.stream(CancellationToken::new(), req()).await.unwrap()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { text } if text == "ok")));
    }

    #[tokio::test]
    async fn always_fail_fails_on_every_call() {
        let p = ScriptedProvider::always_fail(
            "down",
            ProviderError::RateLimitOrAuth("limited".into()),
        );
        for _ in 0..3 {
            let err = p.stream(CancellationToken::new(), req()).await.err().unwrap();
            assert!(matches!(err, ProviderError::RateLimitOrAuth(_)));
        }
        assert_eq!(p.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back_to_sentinel_text() {
        let p = ScriptedProvider::new("empty", vec![]);
        let events = collect(p.stream(CancellationToken::new(), req()).await.unwrap()).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { text } if text.contains("no more scripts"))));
    }

    #[tokio::test]
    async fn last_request_captures_what_was_sent() {
        let p = ScriptedProvider::always_text("cap", "ok");
        let _ = p.stream(CancellationToken::new(), req()).await.unwrap();
        let captured = p.last_request.lock().unwrap();
        assert_eq!(captured.as_ref().unwrap().messages[0].text(), "hi");
    }
}
