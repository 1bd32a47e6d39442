// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use otto_model::{ToolCall, ToolResult};
use otto_tools::{ToolDescriptor, ToolRegistry};

/// The narrow view of the tool dispatcher that the runner and orchestrator
/// consume.  Defining it here, at the consumer, keeps this crate decoupled
/// from the concrete registry and cuts the runner ↔ task-tool cycle at a
/// seam instead of a global.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    fn list(&self) -> Vec<ToolDescriptor>;
    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult;
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    fn list(&self) -> Vec<ToolDescriptor> {
        ToolRegistry::list(self)
    }

    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> ToolResult {
        ToolRegistry::execute(self, cancel, call).await
    }
}
