// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Providers in failover order: the runner walks this list front to
    /// back when one reports a rate-limit or auth failure.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver identifier: "openai" (any OpenAI-compatible endpoint),
    /// "anthropic", or "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub model: String,
    /// Instance id used for logging and `--provider` selection.  Defaults
    /// to the driver name.
    pub id: Option<String>,
    /// Environment variable holding the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local servers and proxies.
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.provider)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on provider turns per run.  The counter is global across
    /// provider failover, so it bounds the whole run, not each provider.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Iteration cap for sub-agent runs.
    #[serde(default = "default_subagent_max_iterations")]
    pub subagent_max_iterations: u32,
    /// How many trailing messages of session history each provider request
    /// sees.  `0` sends everything.
    #[serde(default = "default_history_window")]
    pub history_window: i64,
    /// Maximum sub-agents running at once.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// Maximum non-terminal sub-agents per parent session.
    #[serde(default = "default_max_agents_per_parent")]
    pub max_agents_per_parent: usize,
    /// Default sub-agent timeout in seconds.  `0` disables the deadline.
    #[serde(default = "default_subagent_timeout_secs")]
    pub subagent_timeout_secs: u64,
    /// Override for the built-in system prompt.
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    100
}
fn default_subagent_max_iterations() -> u32 {
    50
}
fn default_history_window() -> i64 {
    50
}
fn default_max_concurrent_agents() -> usize {
    5
}
fn default_max_agents_per_parent() -> usize {
    10
}
fn default_subagent_timeout_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            subagent_max_iterations: default_subagent_max_iterations(),
            history_window: default_history_window(),
            max_concurrent_agents: default_max_concurrent_agents(),
            max_agents_per_parent: default_max_agents_per_parent(),
            subagent_timeout_secs: default_subagent_timeout_secs(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file.  Defaults to `~/.otto/otto.db`.
    pub db_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(p) = &self.db_path {
            return p.clone();
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".otto").join("otto.db")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_defaults_match_documented_caps() {
        let a = AgentConfig::default();
        assert_eq!(a.max_iterations, 100);
        assert_eq!(a.subagent_max_iterations, 50);
        assert_eq!(a.history_window, 50);
        assert_eq!(a.max_concurrent_agents, 5);
        assert_eq!(a.max_agents_per_parent, 10);
        assert_eq!(a.subagent_timeout_secs, 300);
    }

    #[test]
    fn provider_id_falls_back_to_driver_name() {
        let p: ProviderConfig =
            serde_yaml::from_str("provider: openai\nmodel: gpt-4o").unwrap();
        assert_eq!(p.id(), "openai");
        let p: ProviderConfig =
            serde_yaml::from_str("provider: openai\nmodel: gpt-4o\nid: backup").unwrap();
        assert_eq!(p.id(), "backup");
    }

    #[test]
    fn empty_config_deserializes_with_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert!(c.providers.is_empty());
        assert_eq!(c.agent.max_iterations, 100);
    }

    #[test]
    fn store_db_path_override_wins() {
        let s = StoreConfig {
            db_path: Some(PathBuf::from("/tmp/x.db")),
        };
        assert_eq!(s.resolved_db_path(), PathBuf::from("/tmp/x.db"));
    }
}
