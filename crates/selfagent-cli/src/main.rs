use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use selfagent_core::{
    Agent, AgentEvent, AgentSession, InMemoryMemory, ModelRouter, TaskList, ToolRegistry,
};

mod config;

use config::SelfAgentConfig;

#[derive(Parser)]
#[command(name = "selfagent")]
#[command(version)]
#[command(about = "SelfAgent - a tool-using assistant for any LLM provider")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a one-shot message to the agent
    Ask {
        /// The message to send
        message: String,
    },

    /// Interactive conversation (/clear resets, /usage shows tokens, /quit exits)
    Chat,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Ask { message } => cmd_ask(&cli.config, &message).await,
        Commands::Chat => cmd_chat(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("SelfAgent initialized at {}", config_dir.display());
    println!(
        "Edit {} to choose a provider and model.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SelfAgentConfig::load(config_path)?;
    let mut display = config.clone();
    // Never echo secrets back to the terminal
    for key in [
        &mut display.model.api_key,
        &mut display.model.openai_key,
        &mut display.model.anthropic_key,
        &mut display.model.google_key,
        &mut display.model.openrouter_key,
    ] {
        *key = selfagent_core::providers::mask_secret(key);
    }
    println!("{}", toml::to_string_pretty(&display)?);
    Ok(())
}

/// Wire a router, collaborators and one agent into a session
fn build_session(config: &SelfAgentConfig) -> Result<(AgentSession, Arc<ModelRouter>)> {
    let router = Arc::new(
        ModelRouter::new(config.model.clone())
            .context("Failed to initialize model router")?
            .with_fallback_models(config.agent.fallback_models.clone()),
    );
    info!(
        "Using {} model {}",
        router.provider_name(),
        router.model()
    );

    let agent = Agent::new(
        router.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemoryMemory::new()),
        Arc::new(TaskList::new()),
    )
    .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs));

    Ok((AgentSession::new(agent), router))
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str) -> Result<()> {
    let config = SelfAgentConfig::load(config_path)?;
    let (session, router) = build_session(&config)?;

    let failed = run_turn(&session, message).await?;
    router.close();

    if failed {
        anyhow::bail!("Agent turn failed");
    }
    Ok(())
}

async fn cmd_chat(config_path: &Option<PathBuf>) -> Result<()> {
    let config = SelfAgentConfig::load(config_path)?;
    let (session, router) = build_session(&config)?;

    println!("SelfAgent chat. /clear resets the conversation, /usage shows tokens, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => match session.reset() {
                Ok(()) => println!("Conversation cleared."),
                Err(e) => println!("{}", e),
            },
            "/usage" => println!("{}", session.usage().await),
            text => {
                run_turn(&session, text).await?;
            }
        }
    }

    router.close();
    info!("Session usage: {}", session.usage().await);
    Ok(())
}

/// Run one turn and print its events; returns true when the turn ended in error
async fn run_turn(session: &AgentSession, text: &str) -> Result<bool> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);

    let printer = tokio::spawn(async move {
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            match event {
                AgentEvent::Text { content } => println!("{}", content),
                AgentEvent::ToolStart { name, arguments } => {
                    println!("[tool] {} {}", name, serde_json::Value::Object(arguments));
                }
                AgentEvent::ToolResult { name, result } => {
                    debug!("Tool {} returned {} bytes", name, result.len());
                }
                AgentEvent::Usage {
                    input_tokens,
                    output_tokens,
                    model,
                    ..
                } => {
                    debug!(
                        "{}: {} input / {} output tokens",
                        model, input_tokens, output_tokens
                    );
                }
                AgentEvent::Done => {}
                AgentEvent::Error { content } => {
                    eprintln!("Error: {}", content);
                    failed = true;
                }
            }
            if terminal {
                break;
            }
        }
        failed
    });

    if let Err(e) = session.process(text, tx).await {
        println!("{}", e);
    }

    printer.await.context("Event printer task failed")
}
