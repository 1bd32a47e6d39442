// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt construction for the main agent and its sub-agents.

/// Built-in system prompt used when neither the caller nor the config
/// provides one.
pub fn default_system_prompt() -> String {
    "You are a capable assistant running inside a local agent engine. \
     You can call tools to read and change the world; prefer tools over \
     guessing. Rules:\n\
     - Call a tool when you need information you do not have.\n\
     - Use the exact tool input schema; do not invent fields.\n\
     - Destructive or irreversible operations require care: state what you \
     are about to do before doing it.\n\
     - When the task is complete, reply with a final text answer and stop \
     calling tools."
        .to_string()
}

/// Sub-agent behaviour variants.  Each appends distinct guidance to a
/// common focused-sub-agent preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubAgentKind {
    /// Read-only exploration; no changes to the environment.
    Explore,
    /// Produce a plan; do not implement it.
    Plan,
    #[default]
    General,
}

impl SubAgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubAgentKind::Explore => "explore",
            SubAgentKind::Plan => "plan",
            SubAgentKind::General => "general",
        }
    }
}

impl std::str::FromStr for SubAgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explore" => Ok(SubAgentKind::Explore),
            "plan" => Ok(SubAgentKind::Plan),
            "general" => Ok(SubAgentKind::General),
            other => Err(format!("unknown sub-agent kind: {other}")),
        }
    }
}

/// Build the system prompt for a sub-agent run.
pub fn sub_agent_prompt(kind: SubAgentKind, task: &str) -> String {
    let base = format!(
        "You are a focused sub-agent. You were spawned to complete exactly \
         one task and report back; your final text answer is the result your \
         parent receives.\n\nTask: {task}\n\n\
         Work autonomously; there is no user to ask. Stop as soon as the \
         task is done."
    );
    let guidance = match kind {
        SubAgentKind::Explore => {
            "\n\nThis is a read-only exploration task. Gather information \
             with non-destructive tools only; do not modify anything. Report \
             what you found, with enough detail to act on."
        }
        SubAgentKind::Plan => {
            "\n\nProduce a plan, not an implementation. Investigate as \
             needed, then report the concrete steps you would take, in \
             order, with the risks you see. Do not make changes."
        }
        SubAgentKind::General => {
            "\n\nComplete the task end to end, then summarise what you did \
             and what the outcome was."
        }
    };
    base + guidance
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_mentions_tools() {
        assert!(default_system_prompt().contains("tool"));
    }

    #[test]
    fn kinds_parse_round_trip() {
        for kind in [SubAgentKind::Explore, SubAgentKind::Plan, SubAgentKind::General] {
            assert_eq!(kind.as_str().parse::<SubAgentKind>().unwrap(), kind);
        }
        assert!("boss".parse::<SubAgentKind>().is_err());
    }

    #[test]
    fn sub_agent_prompt_embeds_the_task() {
        let p = sub_agent_prompt(SubAgentKind::General, "count the files");
        assert!(p.contains("count the files"));
        assert!(p.contains("focused sub-agent"));
    }

    #[test]
    fn variants_differ_in_guidance() {
        let e = sub_agent_prompt(SubAgentKind::Explore, "t");
        let p = sub_agent_prompt(SubAgentKind::Plan, "t");
        let g = sub_agent_prompt(SubAgentKind::General, "t");
        assert!(e.contains("read-only"));
        assert!(p.contains("plan, not an implementation"));
        assert_ne!(e, p);
        assert_ne!(p, g);
    }
}
