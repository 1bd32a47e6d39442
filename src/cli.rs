// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "otto", version, about = "A local LLM-assistant engine")]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one prompt through the agent loop and stream the reply
    Run {
        /// The user prompt
        prompt: Vec<String>,

        /// Session key (conversations with the same key share history)
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Use only the configured provider with this id
        #[arg(long)]
        provider: Option<String>,

        /// System prompt override
        #[arg(long)]
        system: Option<String>,
    },

    /// Inspect and manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommands {
    /// List sessions, most recently used first
    List,
    /// Delete all messages in a session (the session itself remains)
    Clear { key: String },
}
