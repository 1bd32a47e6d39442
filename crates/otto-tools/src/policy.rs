// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;

use otto_model::ToolCall;

/// Decides whether an approval-gated tool call may run.
///
/// Implementations may block on interactive input.  Non-interactive
/// embeddings (sub-agents, services) must use a non-blocking policy;
/// waiting on stdin inside a sub-agent is a bug, not a feature.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn approve(&self, call: &ToolCall) -> bool;
}

/// Approves everything.  For trusted embeddings and tests.
pub struct AllowAll;

#[async_trait]
impl ApprovalPolicy for AllowAll {
    async fn approve(&self, _call: &ToolCall) -> bool {
        true
    }
}

/// Denies everything.  For locked-down embeddings and tests.
pub struct DenyAll;

#[async_trait]
impl ApprovalPolicy for DenyAll {
    async fn approve(&self, _call: &ToolCall) -> bool {
        false
    }
}

/// Pattern-based policy with a remembered allowlist.
///
/// A call is approved when its tool name matches a configured glob
/// pattern or was remembered by an earlier [`AllowListPolicy::remember`]
/// (the "always allow" answer of an interactive prompt).
pub struct AllowListPolicy {
    patterns: Vec<Regex>,
    remembered: RwLock<HashSet<String>>,
}

impl AllowListPolicy {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().filter_map(|p| glob_to_regex(p)).collect(),
            remembered: RwLock::new(HashSet::new()),
        }
    }

    /// Add a tool name to the remembered allowlist.
    pub fn remember(&self, name: &str) {
        self.remembered.write().insert(name.to_string());
    }
}

#[async_trait]
impl ApprovalPolicy for AllowListPolicy {
    async fn approve(&self, call: &ToolCall) -> bool {
        if self.remembered.read().contains(&call.name) {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(&call.name))
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
