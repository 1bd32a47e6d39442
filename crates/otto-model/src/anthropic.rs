// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Adapter for the Anthropic Messages API.
//!
//! Differences from the OpenAI-flavoured wire that this adapter absorbs:
//! the system prompt travels as a top-level `system` field rather than a
//! conversation turn, tool calls are `tool_use` content blocks inside the
//! assistant turn, and tool results are `tool_result` blocks inside a user
//! turn.  Tool-call input streams as `input_json_delta` fragments which are
//! assembled per content block and emitted whole at `content_block_stop`.

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            api_key,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        req: ChatRequest,
    ) -> Result<EventStream, ProviderError> {
        let (system, messages) = build_wire_messages(&req);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
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
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            provider = %self.id,
            model = %self.model,
            message_count = req.messages.len(),
            "sending anthropic request"
        );

        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Other("anthropic API key not configured".into()))?;

        let http_req = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProviderError::Other("request cancelled".into()));
            }
            resp = http_req.send() => {
                resp.map_err(|e| ProviderError::Other(format!("anthropic request failed: {e}")))?
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

async fn run_stream(
    resp: reqwest::Response,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut bytes = resp.bytes_stream();
    let mut line_buf = String::new();
    let mut pending: BTreeMap<u32, PendingToolUse> = BTreeMap::new();

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
            None => {
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
        };

        line_buf.push_str(&String::from_utf8_lossy(&data));
        for payload in drain_data_lines(&mut line_buf) {
            let v: Value = match serde_json::from_str(&payload) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match parse_event(&v, &mut pending) {
                Parsed::Event(ev) => {
                    let terminal = ev.is_terminal();
                    let _ = tx.send(ev).await;
                    if terminal {
                        return;
                    }
                }
                Parsed::Noop => {}
            }
        }
    }
}

struct PendingToolUse {
    id: String,
    name: String,
    json_buf: String,
}

impl PendingToolUse {
    fn finish(self) -> ToolCall {
        let input = if self.json_buf.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.json_buf).unwrap_or_else(|e| {
                warn!(tool_name = %self.name, error = %e, "invalid tool_use input JSON; substituting {{}}");
                json!({})
            })
        };
        ToolCall {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

enum Parsed {
    Event(StreamEvent),
    Noop,
}

fn parse_event(v: &Value, pending: &mut BTreeMap<u32, PendingToolUse>) -> Parsed {
    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                pending.insert(
                    index,
                    PendingToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        json_buf: String::new(),
                    },
                );
            }
            Parsed::Noop
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        Parsed::Noop
                    } else {
                        Parsed::Event(StreamEvent::text_delta(text))
                    }
                }
                "thinking_delta" => {
                    let text = delta["thinking"].as_str().unwrap_or("");
                    if text.is_empty() {
                        Parsed::Noop
                    } else {
                        Parsed::Event(StreamEvent::thinking_delta(text))
                    }
                }
                "input_json_delta" => {
                    if let Some(p) = pending.get_mut(&index) {
                        p.json_buf
                            .push_str(delta["partial_json"].as_str().unwrap_or(""));
                    }
                    Parsed::Noop
                }
                _ => Parsed::Noop,
            }
        }
        // The block end is the assembly point: only here is the input blob
        // guaranteed complete.
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            match pending.remove(&index) {
                Some(p) if !p.name.is_empty() => Parsed::Event(StreamEvent::tool_call(p.finish())),
                _ => Parsed::Noop,
            }
        }
        "message_stop" => Parsed::Event(StreamEvent::Done),
        "error" => {
            let wire = WireError::from_body(&v["error"].to_string());
            let message = wire
                .message
                .clone()
                .unwrap_or_else(|| v["error"].to_string());
            let overloaded = wire.error_type.as_deref() == Some("overloaded_error");
            let err = if overloaded {
                ProviderError::RateLimitOrAuth(message)
            } else {
                classify_wire_error(&wire, false, &message)
            };
            Parsed::Event(StreamEvent::error((&err).into()))
        }
        _ => Parsed::Noop,
    }
}

/// Map the canonical message list into `(system, messages)` for the wire.
///
/// System messages inside the history merge into the top-level system text;
/// the explicit request prompt comes first.
fn build_wire_messages(req: &ChatRequest) -> (String, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    if let Some(sys) = &req.system_prompt {
        if !sys.is_empty() {
            system_parts.push(sys);
        }
    }

    let mut out: Vec<Value> = Vec::with_capacity(req.messages.len());
    for m in &req.messages {
        match m.role {
            Role::System => {
                if !m.text().is_empty() {
                    system_parts.push(m.text());
                }
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.text() }));
            }
            Role::Assistant => {
                if m.is_empty() {
                    continue;
                }
                let mut blocks: Vec<Value> = Vec::new();
                if !m.text().is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.text() }));
                }
                for c in m.tool_calls.as_deref().unwrap_or_default() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": c.name,
                        "input": c.input,
                    }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                let blocks: Vec<Value> = m
                    .tool_results
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|r| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": r.tool_call_id,
                            "content": r.content,
                            "is_error": r.is_error,
                        })
                    })
                    .collect();
                out.push(json!({ "role": "user", "content": blocks }));
            }
        }
    }
    (system_parts.join("\n\n"), out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
