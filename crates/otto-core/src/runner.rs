// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent runner: one `run` drives the think → call tools → observe
//! loop for a single user prompt against the configured provider list.
//!
//! Three nested loops, outermost first:
//! 1. provider loop: walk the provider list on rate-limit/auth failures;
//! 2. compaction loop: one compact-and-retry per provider on context
//!    overflow;
//! 3. iteration loop: provider turns, bounded by `max_iterations`.
//!
//! The iteration counter is shared across provider failover: it caps the
//! run, not each provider.
//!
//! Each run spawns one producer task writing to a bounded channel; the
//! caller consumes the receiver.  A dropped receiver stops the producer at
//! its next send.  Every run delivers exactly one terminal event (`Done`
//! or `Error`).

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use otto_config::AgentConfig;
use otto_model::{
    ChatRequest, ErrorEvent, ErrorKind, Message, Provider, ProviderError, StreamEvent, ToolCall,
    ToolSchema, EVENT_BUFFER,
};
use otto_store::{SessionStore, StoreError};

use crate::dispatch::ToolDispatch;
use crate::prompts::default_system_prompt;
use crate::summary::summarize_history;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_iterations: u32,
    pub history_window: i64,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Overrides the built-in system prompt when the caller passes none.
    pub system_prompt: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            history_window: 50,
            max_tokens: None,
            temperature: None,
            system_prompt: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_agent_config(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            history_window: cfg.history_window,
            system_prompt: cfg.system_prompt.clone(),
            ..Default::default()
        }
    }

    /// Sub-agent variant: same knobs, lower iteration cap.
    pub fn for_sub_agent(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.subagent_max_iterations,
            ..Self::from_agent_config(cfg)
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    store: Arc<SessionStore>,
    providers: Vec<Arc<dyn Provider>>,
    tools: Arc<dyn ToolDispatch>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        store: Arc<SessionStore>,
        providers: Vec<Arc<dyn Provider>>,
        tools: Arc<dyn ToolDispatch>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            providers,
            tools,
            config,
        }
    }

    /// Run one user turn and stream the result.
    ///
    /// An empty `session_key` falls back to `"default"`; an empty `prompt`
    /// continues the session without appending a user message.
    pub fn run(
        &self,
        cancel: CancellationToken,
        session_key: &str,
        prompt: &str,
        system_prompt: Option<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let runner = self.clone();
        let session_key = session_key.to_string();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            runner
                .run_inner(cancel, session_key, prompt, system_prompt, Emitter(tx))
                .await;
        });
        rx
    }

    async fn run_inner(
        self,
        cancel: CancellationToken,
        session_key: String,
        prompt: String,
        system_override: Option<String>,
        emit: Emitter,
    ) {
        if self.providers.is_empty() {
            emit.error(ErrorKind::Provider, "no providers configured").await;
            return;
        }

        let key = if session_key.is_empty() {
            "default"
        } else {
            &session_key
        };
        let system_prompt = system_override
            .or_else(|| self.config.system_prompt.clone())
            .unwrap_or_else(default_system_prompt);

        let session = match self.store.get_or_create(key) {
            Ok(s) => s,
            Err(e) => {
                emit.store_error(e).await;
                return;
            }
        };
        if !prompt.is_empty() {
            if let Err(e) = self.store.append(&session.id, &Message::user(&prompt)) {
                emit.store_error(e).await;
                return;
            }
        }

        let schemas: Vec<ToolSchema> = self.tools.list().iter().map(|d| d.to_schema()).collect();
        let mut iterations: u32 = 0;

        'providers: for provider in &self.providers {
            let mut compaction_attempted = false;
            'compaction: loop {
                while iterations < self.config.max_iterations {
                    if cancel.is_cancelled() {
                        emit.cancelled().await;
                        return;
                    }
                    iterations += 1;
                    debug!(
                        provider = provider.id(),
                        iteration = iterations,
                        session = %session.key,
                        "starting turn"
                    );

                    let history = match self
                        .store
                        .read_window(&session.id, self.config.history_window)
                    {
                        Ok(h) => h,
                        Err(e) => {
                            emit.store_error(e).await;
                            return;
                        }
                    };

                    let req = ChatRequest {
                        messages: history.clone(),
                        tools: schemas.clone(),
                        max_tokens: self.config.max_tokens,
                        temperature: self.config.temperature,
                        system_prompt: Some(system_prompt.clone()),
                    };

                    let mut stream = match provider.stream(cancel.child_token(), req).await {
                        Ok(s) => s,
                        Err(ProviderError::ContextOverflow(msg)) if !compaction_attempted => {
                            compaction_attempted = true;
                            warn!(
                                provider = provider.id(),
                                %msg,
                                "context overflow; compacting and retrying"
                            );
                            let summary = summarize_history(&history);
                            if let Err(e) = self.store.compact(&session.id, &summary) {
                                emit.store_error(e).await;
                                return;
                            }
                            continue 'compaction;
                        }
                        Err(ProviderError::RateLimitOrAuth(msg)) => {
                            warn!(
                                provider = provider.id(),
                                %msg,
                                "provider unavailable; advancing to next"
                            );
                            continue 'providers;
                        }
                        Err(e) => {
                            emit.send(StreamEvent::error((&e).into())).await;
                            return;
                        }
                    };

                    // Consume the turn, forwarding events while accumulating
                    // the assistant's text and tool-call intents.  The
                    // provider's own Done marks the turn end and is not
                    // forwarded; the run emits its single terminal event
                    // itself.
                    let mut assistant_text = String::new();
                    let mut tool_calls: Vec<ToolCall> = Vec::new();
                    loop {
                        let ev = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                emit.cancelled().await;
                                return;
                            }
                            ev = stream.next() => ev,
                        };
                        let Some(ev) = ev else { break };
                        if matches!(ev, StreamEvent::Done) {
                            break;
                        }
                        let terminal = ev.is_terminal();
                        match &ev {
                            StreamEvent::TextDelta { text } => assistant_text.push_str(text),
                            StreamEvent::ToolCall { tool_call } => {
                                tool_calls.push(tool_call.clone())
                            }
                            _ => {}
                        }
                        if !emit.send(ev).await {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }

                    if !assistant_text.is_empty() || !tool_calls.is_empty() {
                        let msg =
                            Message::assistant_with_tools(assistant_text, tool_calls.clone());
                        if let Err(e) = self.store.append(&session.id, &msg) {
                            emit.store_error(e).await;
                            return;
                        }
                    }

                    // No tool calls: the model declared completion.
                    if tool_calls.is_empty() {
                        emit.send(StreamEvent::Done).await;
                        return;
                    }

                    let mut results = Vec::with_capacity(tool_calls.len());
                    for call in &tool_calls {
                        debug!(tool = %call.name, call_id = %call.id, "executing tool call");
                        let result = self.tools.execute(&cancel, call).await;
                        if !emit.send(StreamEvent::tool_result(result.clone())).await {
                            return;
                        }
                        results.push(result);
                    }
                    if let Err(e) = self
                        .store
                        .append(&session.id, &Message::tool_results(results))
                    {
                        emit.store_error(e).await;
                        return;
                    }
                    // Loop: the next turn re-reads history so the provider
                    // sees the just-persisted assistant and tool turns.
                }

                emit.error(ErrorKind::IterationCap, "reached maximum iterations")
                    .await;
                return;
            }
        }

        emit.error(ErrorKind::ProvidersExhausted, "all providers failed")
            .await;
    }
}

/// Sends events to the consumer.  A failed send means the consumer dropped
/// the receiver; callers treat that as the end of the run.
struct Emitter(mpsc::Sender<StreamEvent>);

impl Emitter {
    async fn send(&self, ev: StreamEvent) -> bool {
        self.0.send(ev).await.is_ok()
    }

    async fn error(&self, kind: ErrorKind, message: &str) {
        let _ = self
            .send(StreamEvent::error(ErrorEvent::new(kind, message)))
            .await;
    }

    async fn cancelled(&self) {
        let _ = self.send(StreamEvent::error(ErrorEvent::cancelled())).await;
    }

    async fn store_error(&self, e: StoreError) {
        let _ = self
            .send(StreamEvent::error(ErrorEvent::new(
                ErrorKind::Store,
                e.to_string(),
            )))
            .await;
    }
}
