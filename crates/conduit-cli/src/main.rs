//! Conduit CLI: chat with a model that can call tools on MCP servers.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use conduit_api::OpenAiProvider;
use conduit_config::{CliOverrides, ConduitConfig};
use conduit_core::{LoopEvent, LoopStop, ToolCallLoop};
use conduit_mcp::{ConnectionRegistry, ToolOrchestrator};
use conduit_types::ChatMessage;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "conduit", version, about = "Chat with tools served over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key (overrides CONDUIT_API_KEY / OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory holding config.toml (overrides CONDUIT_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Send a prompt; the model may call tools of the selected servers
    Chat {
        prompt: String,

        /// Server id whose tools are offered (repeatable; default: configured selection)
        #[arg(long = "server", value_name = "ID")]
        servers: Vec<String>,

        /// Maximum number of model rounds
        #[arg(long)]
        max_rounds: Option<usize>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,
    },
    /// List configured servers
    Servers,
    /// Connect enabled servers and list their tools
    Tools,
    /// Probe a configured server without tracking it
    Test {
        /// Server id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let (model, max_rounds) = match &cli.command {
        Command::Chat {
            model, max_rounds, ..
        } => (model.clone(), *max_rounds),
        _ => (None, None),
    };
    let config = ConduitConfig::load(CliOverrides {
        api_key: cli.api_key,
        model,
        max_tool_rounds: max_rounds,
        config_dir: cli.config_dir,
    })
    .context("Failed to load configuration")?;

    let registry = Arc::new(ConnectionRegistry::new(config.mcp.clone()));

    let result = match cli.command {
        Command::Chat {
            prompt,
            servers,
            system,
            ..
        } => chat(&config, &registry, prompt, servers, system).await,
        Command::Servers => {
            list_servers(&registry).await;
            Ok(())
        }
        Command::Tools => list_tools(&registry).await,
        Command::Test { id } => test_server(&registry, &id).await,
    };

    registry.disconnect_all().await;
    result
}

async fn chat(
    config: &ConduitConfig,
    registry: &Arc<ConnectionRegistry>,
    prompt: String,
    servers: Vec<String>,
    system: Option<String>,
) -> Result<()> {
    let api_key = config.require_api_key()?;
    let provider = OpenAiProvider::new(api_key, &config.base_url)
        .context("Failed to create chat client")?;

    let _status_log = spawn_status_logger(registry);
    let connected = registry.connect_enabled().await;
    tracing::info!("Connected MCP servers: {}", connected.join(", "));

    let orchestrator = if servers.is_empty() {
        ToolOrchestrator::for_selected(Arc::clone(registry)).await
    } else {
        ToolOrchestrator::new(Arc::clone(registry), servers)
    };
    let tools = orchestrator.function_schemas().await;

    let mut tool_loop = ToolCallLoop::new(
        Arc::new(provider),
        Arc::new(orchestrator),
        config.model.clone(),
    );
    tool_loop.set_max_rounds(config.max_tool_rounds);
    if let Some(t) = config.temperature {
        tool_loop.set_temperature(t);
    }
    if let Some(p) = config.top_p {
        tool_loop.set_top_p(p);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut shown = String::new();

    let outcome = tool_loop
        .run(&mut messages, tools, cancel, |event| match event {
            LoopEvent::Text(snapshot) => {
                match unseen_suffix(&shown, &snapshot) {
                    Some(rest) => {
                        let _ = write!(out, "{rest}");
                    }
                    None if snapshot.is_empty() => {
                        if !shown.is_empty() {
                            let _ = writeln!(out);
                        }
                    }
                    None => {
                        let _ = write!(out, "\n{snapshot}");
                    }
                }
                let _ = out.flush();
                shown = snapshot;
            }
            LoopEvent::ToolStart { name, arguments } => {
                eprintln!("  [tool: {name} {arguments}]");
            }
            LoopEvent::ToolEnd {
                name,
                output,
                is_error,
            } => {
                if is_error {
                    eprintln!("  [tool {name} error: {output}]");
                } else {
                    eprintln!("  [tool {name} done: {output}]");
                }
            }
            LoopEvent::RoundLimitReached => {
                tracing::warn!("Tool-call round limit reached");
            }
            LoopEvent::Cancelled => {
                let _ = writeln!(out);
                eprintln!("Cancelled.");
            }
            LoopEvent::Done => {
                let _ = writeln!(out);
            }
        })
        .await;

    ctrl_c.abort();
    let outcome = outcome.context("Chat failed")?;
    tracing::debug!(rounds = outcome.rounds, stop = ?outcome.stop, "Chat finished");
    if outcome.stop == LoopStop::RoundLimit {
        println!();
    }
    Ok(())
}

/// Part of `snapshot` not yet printed, when it extends what was shown.
fn unseen_suffix<'a>(shown: &str, snapshot: &'a str) -> Option<&'a str> {
    if snapshot.is_empty() {
        return None;
    }
    snapshot.strip_prefix(shown)
}

/// Log every connection status change at info level.
fn spawn_status_logger(registry: &ConnectionRegistry) -> tokio::task::JoinHandle<()> {
    let mut rx = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(state) => match &state.error {
                    Some(err) => {
                        tracing::info!(server = %state.server_id, "{}: {err}", state.status)
                    }
                    None => tracing::info!(server = %state.server_id, "{}", state.status),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Missed {n} status updates");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn list_servers(registry: &ConnectionRegistry) {
    let settings = registry.settings().await;
    if settings.servers.is_empty() {
        eprintln!("No MCP servers configured.");
        return;
    }
    eprintln!(
        "MCP servers (global toggle: {}):",
        if settings.enabled { "on" } else { "off" }
    );
    for server in &settings.servers {
        let selected = settings.selected.contains(&server.id);
        println!(
            "  {} {:<24} {:<6} {:<8} {}",
            if selected { "*" } else { " " },
            server.id,
            server.transport.kind(),
            if server.enabled { "enabled" } else { "disabled" },
            server.name
        );
    }
}

async fn list_tools(registry: &ConnectionRegistry) -> Result<()> {
    if !registry.is_enabled().await {
        bail!("MCP is disabled; set `enabled = true` under [mcp] in config.toml");
    }
    registry.connect_enabled().await;

    for state in registry.states().await {
        if !state.is_connected() {
            let reason = state.error.as_deref().unwrap_or("not connected");
            eprintln!("{}: {} ({reason})", state.server_id, state.status);
        }
    }

    let tools = registry.all_tools().await;
    if tools.is_empty() {
        eprintln!("No tools available.");
    }
    for tool in tools {
        println!(
            "{:<40} {}",
            tool.qualified_name,
            conduit_types::truncate_str(&tool.description, 80)
        );
    }
    Ok(())
}

async fn test_server(registry: &ConnectionRegistry, id: &str) -> Result<()> {
    let Some(config) = registry.server(id).await else {
        bail!("No server with id '{id}'");
    };
    registry
        .test_connection(&config)
        .await
        .with_context(|| format!("Connection test for '{id}' failed"))?;
    println!("{id}: ok");
    Ok(())
}
