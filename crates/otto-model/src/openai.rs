// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Adapter for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Most hosted and local backends (OpenAI, Groq, OpenRouter, llama.cpp,
//! Ollama, vLLM…) speak this wire format, so one adapter configured with a
//! base URL and auth covers them all.
//!
//! Tool-call arguments arrive as string fragments spread across SSE chunks,
//! keyed by a parallel-call index.  They are accumulated here and emitted
//! as single assembled [`StreamEvent::ToolCall`]s when the model finishes
//! the turn; consumers never see partial calls.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{classify_http_error, classify_wire_error, ErrorEvent, WireError};
use crate::provider::{ChatRequest, EventStream, Provider, EVENT_BUFFER};
use crate::sse::drain_data_lines;
use crate::{ProviderError, Role, StreamEvent, ToolCall};

pub struct OpenAiProvider {
    id: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            id: id.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        req: ChatRequest,
    ) -> Result<EventStream, ProviderError> {
        let messages = build_wire_messages(&req);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            provider = %self.id,
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProviderError::Other("request cancelled".into()));
            }
            resp = http_req.send() => {
                resp.map_err(|e| ProviderError::Other(format!("{} request failed: {e}", self.id)))?
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
        tokio::spawn(run_stream(resp, cancel, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Producer task: read the SSE transport, write assembled events.
async fn run_stream(
    resp: reqwest::Response,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut bytes = resp.bytes_stream();
    let mut line_buf = String::new();
    let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
    let mut flushed = false;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(StreamEvent::error(ErrorEvent::cancelled())).await;
                return;
            }
            chunk = bytes.next() => chunk,
        };

        let data = match chunk {
            Some(Ok(b)) => b,
            Some(Err(e)) => {
                let _ = tx
                    .send(StreamEvent::error(ErrorEvent::new(
                        crate::ErrorKind::Provider,
                        format!("stream transport error: {e}"),
                    )))
                    .await;
                return;
            }
            // Transport closed without the [DONE] sentinel; treat as a
            // normal end so tolerant backends still terminate cleanly.
            None => {
                flush_pending(&mut pending, &tx, &mut flushed).await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        line_buf.push_str(&String::from_utf8_lossy(&data));
        for payload in drain_data_lines(&mut line_buf) {
            if payload == "[DONE]" {
                flush_pending(&mut pending, &tx, &mut flushed).await;
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
            let v: Value = match serde_json::from_str(&payload) {
                Ok(v) => v,
                // Non-conforming lines are skipped per the transport contract.
                Err(_) => continue,
            };
            match parse_chunk(&v) {
                Parsed::Text(t) => {
                    let _ = tx.send(StreamEvent::text_delta(t)).await;
                }
                Parsed::Thinking(t) => {
                    let _ = tx.send(StreamEvent::thinking_delta(t)).await;
                }
                Parsed::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let entry = pending.entry(index).or_default();
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    entry.args_buf.push_str(&arguments);
                }
                // The model has stopped emitting tool-call fragments: every
                // buffered call is now complete and can be surfaced.
                Parsed::Finish => {
                    flush_pending(&mut pending, &tx, &mut flushed).await;
                }
                Parsed::Error(e) => {
                    let _ = tx.send(StreamEvent::error((&e).into())).await;
                    return;
                }
                Parsed::Noop => {}
            }
        }
    }
}

async fn flush_pending(
    pending: &mut BTreeMap<u32, PendingToolCall>,
    tx: &mpsc::Sender<StreamEvent>,
    flushed: &mut bool,
) {
    if *flushed {
        return;
    }
    *flushed = true;
    for (i, (_, ptc)) in std::mem::take(pending).into_iter().enumerate() {
        match ptc.finish(i) {
            Some(tc) => {
                let _ = tx.send(StreamEvent::tool_call(tc)).await;
            }
            None => warn!("dropping tool call with empty name from model"),
        }
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve the buffered fragments into a complete call.  Returns `None`
    /// for calls with no name, which cannot be dispatched.
    fn finish(self, ordinal: usize) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        let input = if self.args_buf.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.args_buf).unwrap_or_else(|e| {
                warn!(
                    tool_name = %self.name,
                    error = %e,
                    "model sent tool call with invalid JSON arguments; substituting {{}}"
                );
                json!({})
            })
        };
        let id = if self.id.is_empty() {
            // Synthetic fallback so the turn can still round-trip.
            format!("call_synthetic_{ordinal}")
        } else {
            self.id
        };
        Some(ToolCall {
            id,
            name: self.name,
            input,
        })
    }
}

enum Parsed {
    Text(String),
    Thinking(String),
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Finish,
    Error(ProviderError),
    Noop,
}

fn parse_chunk(v: &Value) -> Parsed {
    // In-stream error payload: {"error": {...}}
    if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
        let wire = WireError::from_body(&err.to_string());
        let message = wire
            .message
            .clone()
            .unwrap_or_else(|| err.to_string());
        return Parsed::Error(classify_wire_error(&wire, false, &message));
    }

    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return Parsed::ToolCallDelta {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        };
    }

    if choice["finish_reason"].as_str().is_some() {
        return Parsed::Finish;
    }

    // Chain-of-thought text arrives under `reasoning_content` (llama.cpp,
    // DeepSeek) or `reasoning` (OpenRouter).
    if let Some(t) = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()))
    {
        if !t.is_empty() {
            return Parsed::Thinking(t.to_string());
        }
    }

    if let Some(t) = delta.get("content").and_then(|c| c.as_str()) {
        if !t.is_empty() {
            return Parsed::Text(t.to_string());
        }
    }

    Parsed::Noop
}

/// Map the canonical message list into the OpenAI wire-format JSON array.
///
/// A tool message carrying several results fans out into one wire message
/// per result, each with its own `tool_call_id`; the backend matches them
/// to the preceding assistant turn's `tool_calls` entries individually.
fn build_wire_messages(req: &ChatRequest) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);

    if let Some(sys) = &req.system_prompt {
        if !sys.is_empty() {
            out.push(json!({ "role": "system", "content": sys }));
        }
    }

    for m in &req.messages {
        match m.role {
            Role::System | Role::User => {
                out.push(json!({ "role": m.role.as_str(), "content": m.text() }));
            }
            Role::Assistant => {
                if m.is_empty() {
                    continue;
                }
                let mut msg = json!({ "role": "assistant", "content": m.text() });
                if let Some(calls) = &m.tool_calls {
                    if !calls.is_empty() {
                        let wire_calls: Vec<Value> = calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.input.to_string(),
                                    }
                                })
                            })
                            .collect();
                        msg["tool_calls"] = json!(wire_calls);
                    }
                }
                out.push(msg);
            }
            Role::Tool => {
                for r in m.tool_results.as_deref().unwrap_or_default() {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": r.tool_call_id,
                        "content": r.content,
                    }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
