// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use otto_model::{ToolCall, ToolResult, ToolSchema};

/// Static description of one registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object.
    pub input_schema: Value,
    pub requires_approval: bool,
}

impl ToolDescriptor {
    /// The subset of the descriptor presented to the model.
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Trait every tool must implement.
///
/// Failures are data, not errors: wrap them in a [`ToolResult`] with
/// `is_error` set so the model can react to them.
///
/// `cancel` is the caller's cancellation scope.  Long-running tools should
/// observe it; tools that spawn further work (sub-agents) must derive their
/// child scopes from it so parent cancellation propagates.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input object.
    fn input_schema(&self) -> Value;
    /// When true, the registry consults its approval policy before running.
    fn requires_approval(&self) -> bool {
        false
    }
    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
