// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use otto_model::{ToolCall, ToolResult};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolDescriptor};

/// Central registry holding all available tools.
///
/// Registration happens at startup; execution only reads, so the registry
/// is shared as a plain `Arc` with no interior locking.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    policy: Option<Arc<dyn ApprovalPolicy>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            policy: None,
        }
    }

    /// Attach the approval policy consulted for gated tools.  Without one,
    /// gated tools run unprompted.
    pub fn with_policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a pre-wrapped tool.  Used for tools the caller needs to
    /// keep a handle to after registration (late-bound wiring).
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Descriptors for all registered tools, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
                requires_approval: t.requires_approval(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Execute one tool call.
    ///
    /// Never returns an `Err`: lookup failures, denials, and cancellation
    /// all surface as a [`ToolResult`] with `is_error` set, which the
    /// runner feeds back to the model as data.
    pub async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(&call.id, format!("Unknown tool: {}", call.name));
        };

        if tool.requires_approval() {
            if let Some(policy) = &self.policy {
                if !policy.approve(call).await {
                    debug!(tool = %call.name, "tool execution denied by policy");
                    return ToolResult::err(&call.id, "Tool execution denied");
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                ToolResult::err(&call.id, "Tool execution cancelled")
            }
            out = tool.execute(cancel, call) => out,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
