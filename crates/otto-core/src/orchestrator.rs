// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent orchestrator: makes the runner itself callable as a tool.
//!
//! Each spawned agent is an isolated runner loop with its own session
//! (`subagent-<id>`), its own cancellation scope derived from the caller's
//! token (optionally composed with a deadline), and a lower iteration cap.
//! A fixed concurrency cap and a per-parent cap bound resource use;
//! recursion depth is not limited separately.
//!
//! Completion signalling: each agent carries a `Notify` that wakes its
//! waiters on the terminal transition, and every completion is also
//! published on a broadcast topic for observers.  `wait_for` additionally
//! polls the record at a 100 ms tick so a wakeup lost to the
//! check-then-wait race is only ever 100 ms late.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use otto_config::AgentConfig;
use otto_model::{Provider, StreamEvent};
use otto_store::SessionStore;

use crate::dispatch::ToolDispatch;
use crate::prompts::{sub_agent_prompt, SubAgentKind};
use crate::runner::{Runner, RunnerConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const COMPLETIONS_BUFFER: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("maximum concurrent agents reached")]
    MaxConcurrent,
    #[error("maximum agents per parent reached")]
    MaxPerParent,
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("agent is not running")]
    NotRunning,
    #[error("wait cancelled")]
    WaitCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubAgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Public view of one sub-agent.
///
/// Invariants: `completed_at` is set iff the status is terminal;
/// `error` is set iff the status is `Failed`; transitions only move
/// forward along pending → running → terminal.
#[derive(Debug, Clone, Serialize)]
pub struct SubAgent {
    pub id: String,
    pub task: String,
    pub description: String,
    pub status: SubAgentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Accumulated assistant text from the child run.
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Completion record published on the broadcast topic.
#[derive(Debug, Clone)]
pub struct AgentCompletion {
    pub id: String,
    pub success: bool,
    pub result: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Provenance: which session asked for this agent.  Also the grouping
    /// key for the per-parent cap.
    pub parent_session_key: String,
    /// The child's user prompt.
    pub task: String,
    /// Short human label.
    pub description: String,
    /// Block until the agent reaches a terminal state.
    pub wait: bool,
    /// Deadline composed onto the cancellation scope.  `None` uses the
    /// configured default; `Some(ZERO)` disables it.
    pub timeout: Option<Duration>,
    pub system_prompt: Option<String>,
    pub kind: SubAgentKind,
}

impl SpawnRequest {
    pub fn new(task: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            parent_session_key: String::new(),
            task: task.into(),
            description: description.into(),
            wait: false,
            timeout: None,
            system_prompt: None,
            kind: SubAgentKind::General,
        }
    }
}

struct AgentSlot {
    record: SubAgent,
    parent_key: String,
    cancel: CancellationToken,
    done: Arc<Notify>,
    /// Every event the child run produced, stored at completion.
    events: Vec<StreamEvent>,
}

type AgentMap = Arc<RwLock<HashMap<String, AgentSlot>>>;

pub struct Orchestrator {
    agents: AgentMap,
    completions: broadcast::Sender<AgentCompletion>,
    store: Arc<SessionStore>,
    providers: Vec<Arc<dyn Provider>>,
    tools: Arc<dyn ToolDispatch>,
    max_concurrent: usize,
    max_per_parent: usize,
    default_timeout: Duration,
    sub_runner_config: RunnerConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        providers: Vec<Arc<dyn Provider>>,
        tools: Arc<dyn ToolDispatch>,
        cfg: &AgentConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(COMPLETIONS_BUFFER);
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            completions,
            store,
            providers,
            tools,
            max_concurrent: cfg.max_concurrent_agents,
            max_per_parent: cfg.max_agents_per_parent,
            default_timeout: Duration::from_secs(cfg.subagent_timeout_secs),
            sub_runner_config: RunnerConfig::for_sub_agent(cfg),
        }
    }

    /// Spawn a sub-agent.  With `wait` set, blocks until the agent reaches
    /// a terminal state and returns the final record; otherwise returns
    /// the freshly inserted record immediately.
    pub async fn spawn(
        &self,
        cancel: &CancellationToken,
        req: SpawnRequest,
    ) -> Result<SubAgent, OrchestratorError> {
        let (id, child, record) = {
            let mut agents = self.agents.write();

            let active = agents
                .values()
                .filter(|s| !s.record.status.is_terminal())
                .count();
            if active >= self.max_concurrent {
                warn!(active, cap = self.max_concurrent, "spawn rejected: concurrency cap");
                return Err(OrchestratorError::MaxConcurrent);
            }
            let per_parent = agents
                .values()
                .filter(|s| {
                    s.parent_key == req.parent_session_key && !s.record.status.is_terminal()
                })
                .count();
            if per_parent >= self.max_per_parent {
                warn!(
                    parent = %req.parent_session_key,
                    per_parent,
                    cap = self.max_per_parent,
                    "spawn rejected: per-parent cap"
                );
                return Err(OrchestratorError::MaxPerParent);
            }

            // Unique within one process lifetime, which is all that is needed.
            let id = format!("agent-{}-{}", Utc::now().timestamp_millis(), agents.len() + 1);

            let child = cancel.child_token();
            let timeout = req.timeout.unwrap_or(self.default_timeout);
            if !timeout.is_zero() {
                let deadline_token = child.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    deadline_token.cancel();
                });
            }

            let record = SubAgent {
                id: id.clone(),
                task: req.task.clone(),
                description: req.description.clone(),
                status: SubAgentStatus::Pending,
                started_at: Utc::now(),
                completed_at: None,
                result: String::new(),
                error: None,
            };
            agents.insert(
                id.clone(),
                AgentSlot {
                    record: record.clone(),
                    parent_key: req.parent_session_key.clone(),
                    cancel: child.clone(),
                    done: Arc::new(Notify::new()),
                    events: Vec::new(),
                },
            );
            (id, child, record)
        };

        info!(agent_id = %id, description = %record.description, wait = req.wait, "sub-agent spawned");

        let ctx = RunContext {
            agents: Arc::clone(&self.agents),
            completions: self.completions.clone(),
            store: Arc::clone(&self.store),
            providers: self.providers.clone(),
            tools: Arc::clone(&self.tools),
            config: self.sub_runner_config.clone(),
        };
        let run_id = id.clone();
        tokio::spawn(run_agent(ctx, run_id, child, req.clone()));

        if req.wait {
            self.wait_for(cancel, &id).await
        } else {
            Ok(record)
        }
    }

    /// Block until the agent reaches a terminal state.
    ///
    /// Wakes on: caller cancellation (returns [`OrchestratorError::WaitCancelled`]),
    /// the agent's completion notify, or the periodic poll.
    pub async fn wait_for(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<SubAgent, OrchestratorError> {
        loop {
            let (record, done) = {
                let agents = self.agents.read();
                let slot = agents
                    .get(id)
                    .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
                (slot.record.clone(), Arc::clone(&slot.done))
            };
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::WaitCancelled),
                _ = done.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Cancel a pending or running agent.
    pub fn cancel(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut agents = self.agents.write();
        let slot = agents
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        match slot.record.status {
            SubAgentStatus::Pending | SubAgentStatus::Running => {
                slot.record.status = SubAgentStatus::Cancelled;
                slot.record.completed_at = Some(Utc::now());
                slot.cancel.cancel();
                slot.done.notify_waiters();
                info!(agent_id = %id, "sub-agent cancelled");
                Ok(())
            }
            _ => Err(OrchestratorError::NotRunning),
        }
    }

    pub fn get(&self, id: &str) -> Option<SubAgent> {
        self.agents.read().get(id).map(|s| s.record.clone())
    }

    /// All known agents, oldest first.
    pub fn list(&self) -> Vec<SubAgent> {
        let mut out: Vec<SubAgent> = self
            .agents
            .read()
            .values()
            .map(|s| s.record.clone())
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        out
    }

    /// The captured event log of one agent (available once it finished).
    pub fn events(&self, id: &str) -> Option<Vec<StreamEvent>> {
        self.agents.read().get(id).map(|s| s.events.clone())
    }

    /// Number of agents not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.agents
            .read()
            .values()
            .filter(|s| !s.record.status.is_terminal())
            .count()
    }

    /// Subscribe to completion records.
    pub fn completions(&self) -> broadcast::Receiver<AgentCompletion> {
        self.completions.subscribe()
    }

    /// Remove terminal agents that completed more than `max_age` ago.
    /// Returns the number removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|_, s| {
            !(s.record.status.is_terminal()
                && s.record.completed_at.map_or(false, |t| t < cutoff))
        });
        let removed = before - agents.len();
        if removed > 0 {
            debug!(removed, "cleaned up finished sub-agents");
        }
        removed
    }
}

/// Everything the concurrent run body needs, detached from the
/// orchestrator so the spawned task holds no reference cycle.
struct RunContext {
    agents: AgentMap,
    completions: broadcast::Sender<AgentCompletion>,
    store: Arc<SessionStore>,
    providers: Vec<Arc<dyn Provider>>,
    tools: Arc<dyn ToolDispatch>,
    config: RunnerConfig,
}

/// The concurrent run body of one sub-agent.
async fn run_agent(ctx: RunContext, id: String, cancel: CancellationToken, req: SpawnRequest) {
    {
        let mut agents = ctx.agents.write();
        if let Some(slot) = agents.get_mut(&id) {
            if slot.record.status == SubAgentStatus::Pending {
                slot.record.status = SubAgentStatus::Running;
                slot.record.started_at = Utc::now();
            }
        }
    }

    // Dedicated session so child history never mingles with the parent's.
    let session_key = format!("subagent-{id}");
    let system_prompt = req
        .system_prompt
        .clone()
        .unwrap_or_else(|| sub_agent_prompt(req.kind, &req.task));

    let runner = Runner::new(ctx.store, ctx.providers, ctx.tools, ctx.config);
    let mut rx = runner.run(cancel.clone(), &session_key, &req.task, Some(system_prompt));

    let mut result_text = String::new();
    let mut terminal_error: Option<String> = None;
    let mut captured: Vec<StreamEvent> = Vec::new();
    while let Some(ev) = rx.recv().await {
        match &ev {
            StreamEvent::TextDelta { text } => result_text.push_str(text),
            StreamEvent::Error { error } => terminal_error = Some(error.message.clone()),
            _ => {}
        }
        captured.push(ev);
    }

    let completion = {
        let mut agents = ctx.agents.write();
        let Some(slot) = agents.get_mut(&id) else {
            // Removed by cleanup mid-run; nothing to record.
            return;
        };
        let status = if slot.record.status == SubAgentStatus::Cancelled || cancel.is_cancelled() {
            SubAgentStatus::Cancelled
        } else if terminal_error.is_some() {
            SubAgentStatus::Failed
        } else {
            SubAgentStatus::Completed
        };
        slot.record.status = status;
        if slot.record.completed_at.is_none() {
            slot.record.completed_at = Some(Utc::now());
        }
        slot.record.result = result_text.clone();
        slot.record.error = if status == SubAgentStatus::Failed {
            terminal_error.clone()
        } else {
            None
        };
        slot.events = captured;
        slot.done.notify_waiters();

        debug!(agent_id = %id, status = ?status, "sub-agent finished");
        AgentCompletion {
            id: id.clone(),
            success: status == SubAgentStatus::Completed,
            result: result_text,
            error: slot.record.error.clone(),
        }
    };
    // Nobody subscribed is fine; the record already holds the outcome.
    let _ = ctx.completions.send(completion);
}
