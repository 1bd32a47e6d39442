// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `task` tool (spawn a sub-agent) and its `agent_status` companion.
//!
//! The runner calls the dispatcher, the dispatcher contains these tools,
//! and these tools call the orchestrator, which constructs runners.  The
//! cycle is cut with late binding: the tools are registered holding an
//! unset handle and `bind` is called once the orchestrator exists.  No
//! globals.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use otto_model::{ToolCall, ToolResult};
use otto_tools::Tool;

use crate::orchestrator::{Orchestrator, SpawnRequest, SubAgentStatus};
use crate::prompts::SubAgentKind;

/// Late-bound handle shared by both tools.  Weak so the tools (held alive
/// by the registry, which the orchestrator also references) do not keep
/// the orchestrator alive in a cycle.
struct OrchestratorHandle(OnceLock<Weak<Orchestrator>>);

impl OrchestratorHandle {
    fn new() -> Self {
        Self(OnceLock::new())
    }

    fn bind(&self, orchestrator: &Arc<Orchestrator>) {
        let _ = self.0.set(Arc::downgrade(orchestrator));
    }

    fn get(&self) -> Option<Arc<Orchestrator>> {
        self.0.get().and_then(Weak::upgrade)
    }
}

pub struct TaskTool {
    orchestrator: OrchestratorHandle,
}

impl TaskTool {
    pub fn new() -> Self {
        Self {
            orchestrator: OrchestratorHandle::new(),
        }
    }

    /// Wire up the orchestrator after construction.
    pub fn bind(&self, orchestrator: &Arc<Orchestrator>) {
        self.orchestrator.bind(orchestrator);
    }
}

impl Default for TaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn an isolated sub-agent to complete a focused task and return \
         its final text output. The sub-agent runs in its own session with \
         its own timeout. Modes: 'explore' (read-only investigation), \
         'plan' (produce a plan, no changes), 'general' (default)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the sub-agent to complete"
                },
                "description": {
                    "type": "string",
                    "description": "Short label shown in status listings"
                },
                "mode": {
                    "type": "string",
                    "enum": ["explore", "plan", "general"],
                    "description": "Operating mode (default: general)"
                },
                "wait": {
                    "type": "boolean",
                    "description": "Block until the sub-agent finishes (default: true)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Per-agent timeout; 0 disables the deadline"
                },
                "parent_session_key": {
                    "type": "string",
                    "description": "Session that requested this agent"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult {
        let Some(orchestrator) = self.orchestrator.get() else {
            return ToolResult::err(&call.id, "sub-agent orchestrator not available");
        };
        let Some(task) = call.input.get("task").and_then(Value::as_str) else {
            return ToolResult::err(&call.id, "missing 'task'");
        };
        let kind = match call.input.get("mode").and_then(Value::as_str) {
            None => SubAgentKind::General,
            Some(m) => match m.parse() {
                Ok(k) => k,
                Err(e) => return ToolResult::err(&call.id, e),
            },
        };

        let wait = call
            .input
            .get("wait")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let req = SpawnRequest {
            parent_session_key: call
                .input
                .get("parent_session_key")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            task: task.to_string(),
            description: call
                .input
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or(task)
                .to_string(),
            wait,
            timeout: call
                .input
                .get("timeout_secs")
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
            system_prompt: None,
            kind,
        };

        match orchestrator.spawn(cancel, req).await {
            Err(e) => ToolResult::err(&call.id, e.to_string()),
            Ok(agent) if wait => match agent.status {
                SubAgentStatus::Completed => {
                    if agent.result.is_empty() {
                        ToolResult::ok(&call.id, "(sub-agent produced no text output)")
                    } else {
                        ToolResult::ok(&call.id, agent.result)
                    }
                }
                SubAgentStatus::Failed => ToolResult::err(
                    &call.id,
                    format!(
                        "sub-agent failed: {}",
                        agent.error.unwrap_or_else(|| "unknown error".into())
                    ),
                ),
                SubAgentStatus::Cancelled => ToolResult::err(&call.id, "sub-agent cancelled"),
                // wait_for only returns terminal records.
                other => ToolResult::err(&call.id, format!("sub-agent in state {other:?}")),
            },
            Ok(agent) => ToolResult::ok(
                &call.id,
                json!({ "id": agent.id, "status": agent.status }).to_string(),
            ),
        }
    }
}

pub struct AgentStatusTool {
    orchestrator: OrchestratorHandle,
}

impl AgentStatusTool {
    pub fn new() -> Self {
        Self {
            orchestrator: OrchestratorHandle::new(),
        }
    }

    pub fn bind(&self, orchestrator: &Arc<Orchestrator>) {
        self.orchestrator.bind(orchestrator);
    }
}

impl Default for AgentStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &str {
        "agent_status"
    }

    fn description(&self) -> &str {
        "Inspect or cancel sub-agents. Actions: 'list' all agents, \
         'status' of one agent by id, 'cancel' a running agent."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "status", "cancel"]
                },
                "agent_id": {
                    "type": "string",
                    "description": "Required for 'status' and 'cancel'"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, call: &ToolCall) -> ToolResult {
        let Some(orchestrator) = self.orchestrator.get() else {
            return ToolResult::err(&call.id, "sub-agent orchestrator not available");
        };
        let action = call
            .input
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("list");

        match action {
            "list" => match serde_json::to_string_pretty(&orchestrator.list()) {
                Ok(listing) => ToolResult::ok(&call.id, listing),
                Err(e) => ToolResult::err(&call.id, format!("serializing agent list: {e}")),
            },
            "status" => {
                let Some(id) = call.input.get("agent_id").and_then(Value::as_str) else {
                    return ToolResult::err(&call.id, "missing 'agent_id'");
                };
                match orchestrator.get(id) {
                    Some(agent) => match serde_json::to_string_pretty(&agent) {
                        Ok(s) => ToolResult::ok(&call.id, s),
                        Err(e) => ToolResult::err(&call.id, format!("serializing agent: {e}")),
                    },
                    None => ToolResult::err(&call.id, format!("agent not found: {id}")),
                }
            }
            "cancel" => {
                let Some(id) = call.input.get("agent_id").and_then(Value::as_str) else {
                    return ToolResult::err(&call.id, "missing 'agent_id'");
                };
                match orchestrator.cancel(id) {
                    Ok(()) => ToolResult::ok(&call.id, format!("cancelled {id}")),
                    Err(e) => ToolResult::err(&call.id, e.to_string()),
                }
            }
            other => ToolResult::err(&call.id, format!("unknown action: {other}")),
        }
    }
}
