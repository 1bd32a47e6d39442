// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;

use cli::{Cli, Commands, SessionCommands};
use otto_config::Config;
use otto_core::{AgentStatusTool, Orchestrator, Runner, RunnerConfig, TaskTool, ToolDispatch};
use otto_model::{ErrorKind, Provider, StreamEvent};
use otto_store::SessionStore;
use otto_tools::{Tool, ToolRegistry};

// Exit codes: 0 success, 1 configuration error, 2 runtime error,
// 130 interrupted.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match otto_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Run {
            prompt,
            session,
            provider,
            system,
        } => run_cmd(&config, &prompt.join(" "), &session, provider.as_deref(), system).await,
        Commands::Sessions { command } => match sessions_cmd(&config, command) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("error: {e:#}");
                2
            }
        },
    };
    std::process::exit(code);
}

async fn run_cmd(
    config: &Config,
    prompt: &str,
    session: &str,
    provider_filter: Option<&str>,
    system: Option<String>,
) -> i32 {
    let providers = match build_providers(config, provider_filter) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return 1;
        }
    };

    let store = match SessionStore::open(&config.store.resolved_db_path()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("error: opening session store: {e}");
            return 2;
        }
    };

    // The task tools are registered first and wired to the orchestrator
    // once it exists; the orchestrator in turn builds runners against the
    // same registry, which is what makes the recursion work.
    let task_tool = Arc::new(TaskTool::new());
    let status_tool = Arc::new(AgentStatusTool::new());
    let mut registry = ToolRegistry::new();
    registry.register_arc(Arc::clone(&task_tool) as Arc<dyn Tool>);
    registry.register_arc(Arc::clone(&status_tool) as Arc<dyn Tool>);
    let registry = Arc::new(registry);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        providers.clone(),
        Arc::clone(&registry) as Arc<dyn ToolDispatch>,
        &config.agent,
    ));
    task_tool.bind(&orchestrator);
    status_tool.bind(&orchestrator);

    let runner = Runner::new(
        store,
        providers,
        registry as Arc<dyn ToolDispatch>,
        RunnerConfig::from_agent_config(&config.agent),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut rx = runner.run(cancel, session, prompt, system);
    let mut interrupted = false;
    let mut failed = false;
    let mut stdout = std::io::stdout();
    while let Some(ev) = rx.recv().await {
        match ev {
            StreamEvent::TextDelta { text } => {
                print!("{text}");
                let _ = stdout.flush();
            }
            StreamEvent::ThinkingDelta { .. } => {}
            StreamEvent::ToolCall { tool_call } => {
                tracing::info!(tool = %tool_call.name, call_id = %tool_call.id, "tool call");
            }
            StreamEvent::ToolResult { tool_result } => {
                tracing::info!(
                    call_id = %tool_result.tool_call_id,
                    is_error = tool_result.is_error,
                    "tool result"
                );
            }
            StreamEvent::Error { error } => {
                eprintln!("\nerror: {}", error.message);
                if error.kind == ErrorKind::Cancelled {
                    interrupted = true;
                } else {
                    failed = true;
                }
            }
            StreamEvent::Done => {}
        }
    }
    println!();

    if interrupted {
        130
    } else if failed {
        2
    } else {
        0
    }
}

fn build_providers(
    config: &Config,
    filter: Option<&str>,
) -> anyhow::Result<Vec<Arc<dyn Provider>>> {
    let selected: Vec<_> = config
        .providers
        .iter()
        .filter(|p| filter.map_or(true, |f| p.id() == f))
        .collect();
    if selected.is_empty() {
        match filter {
            Some(f) => bail!("no configured provider matches --provider {f}"),
            None => bail!(
                "no providers configured; add a `providers:` section to your config"
            ),
        }
    }
    selected.into_iter().map(otto_model::from_config).collect()
}

fn sessions_cmd(config: &Config, cmd: SessionCommands) -> anyhow::Result<()> {
    let store = SessionStore::open(&config.store.resolved_db_path())?;
    match cmd {
        SessionCommands::List => {
            for s in store.list_sessions()? {
                println!(
                    "{:<24} {}  updated {}",
                    s.key,
                    s.id,
                    s.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        SessionCommands::Clear { key } => match store.get(&key)? {
            Some(s) => {
                store.reset(&s.id)?;
                println!("cleared session '{key}'");
            }
            None => bail!("no such session: {key}"),
        },
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
