//! AIDev - agentic code assistant
//!
//! A CLI that lets a local Ollama model call analysis tools (dead code,
//! lint, comments, commit, PR review) on a workspace, or runs those tools
//! directly.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, agent or tool failure, etc.)
//!   2 - Scan completed with error-severity findings

mod agent;
mod cli;
mod config;
mod git;
mod models;
mod provider;
mod registry;
mod scanner;
mod tools;

use agent::{AgentAction, AgentConfig, AgentRun, ChatMessage};
use anyhow::{Context, Result};
use cli::{Args, Commands};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use models::{ExportFormat, ScanResult, ScanStatus, Severity};
use provider::{ModelProvider, OllamaProvider};
use registry::ToolId;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tools::{ScanOptions, ToolContext, ToolRunner};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Commands::InitConfig { force } = args.command {
        return handle_init_config(&args.workspace, force);
    }

    // Initialize logging
    init_logging(&args);

    info!("AIDev v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .aidev.toml in the workspace.
fn handle_init_config(workspace: &Path, force: bool) -> Result<()> {
    let path = workspace.join(CONFIG_FILE_NAME);

    if path.exists() && !force {
        eprintln!(
            "⚠️  {} already exists. Pass --force to overwrite it.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("Failed to create {}", workspace.display()))?;
    let content = Config::default_toml();
    std::fs::write(&path, &content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Created {} with default settings.", path.display());
    println!("   Edit it to customize models, agent limits, linters, and more.");
    Ok(())
}

/// Initialize the logging subsystem.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the subcommand. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let workspace = args
        .workspace
        .canonicalize()
        .with_context(|| format!("Failed to resolve workspace {}", args.workspace.display()))?;

    let mut config = load_config(&args, &workspace)?;
    config.merge_with_args(&args);

    match args.command {
        Commands::Tools => {
            print_tools();
            Ok(0)
        }
        Commands::Models => {
            let provider = OllamaProvider::new(&config.model)?;
            print_models(&provider).await
        }
        Commands::Scan {
            tool,
            paths,
            format,
            output,
            tool_args,
        } => {
            let provider: Arc<dyn ModelProvider> = Arc::new(OllamaProvider::new(&config.model)?);
            let ctx = ToolContext::new(workspace, config, provider);
            run_scan(
                ctx,
                tool,
                paths,
                tool_args,
                format.into(),
                output.as_deref(),
                args.quiet,
            )
            .await
        }
        Commands::Chat {
            message,
            history,
            save_history,
            yes,
            max_turns,
            max_tokens,
        } => {
            let mut settings = config.agent.clone();
            if let Some(turns) = max_turns {
                settings.max_turns = turns;
            }
            if let Some(tokens) = max_tokens {
                settings.max_token_budget = tokens;
            }
            let agent_config = AgentConfig::from_settings(&settings)?;

            let provider: Arc<dyn ModelProvider> = Arc::new(OllamaProvider::new(&config.model)?);
            let ctx = ToolContext::new(workspace, config, provider);
            let chat = ChatOptions {
                message: message.join(" "),
                history,
                save_history,
                auto_approve: yes,
                quiet: args.quiet,
            };
            run_chat(ctx, agent_config, chat).await
        }
        // Handled before logging is set up
        Commands::InitConfig { .. } => Ok(0),
    }
}

/// Load configuration: explicit file, then the workspace file, then defaults.
fn load_config(args: &Args, workspace: &Path) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_from_workspace(workspace) {
        Ok(Some(config)) => {
            info!("Loaded config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

/// A spinner on stderr, or nothing in quiet mode.
fn spinner(message: String, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling...");
            token.cancel();
        }
    });
}

fn print_tools() {
    println!("🧰 Available tools:\n");
    for entry in registry::all_tools() {
        let mode = if entry.is_autonomous() {
            "autonomous"
        } else {
            "asks first"
        };
        println!("   {:<10} {} ({})", entry.command, entry.display_name, mode);
        println!("              {}", entry.description);
    }
}

async fn print_models(provider: &dyn ModelProvider) -> Result<i32> {
    let models = provider
        .list_models()
        .await
        .context("Failed to list models")?;

    if models.is_empty() {
        println!("No models installed.");
        return Ok(0);
    }

    println!("📦 Models:\n");
    for model in models {
        match model.size_bytes {
            Some(size) => println!(
                "   {} ({:.1} GB)",
                model.name,
                size as f64 / 1_000_000_000.0
            ),
            None => println!("   {}", model.name),
        }
    }
    Ok(0)
}

/// Run one tool directly and write its report.
async fn run_scan(
    ctx: ToolContext,
    tool: ToolId,
    paths: Vec<PathBuf>,
    tool_args: Vec<(String, Value)>,
    format: ExportFormat,
    output: Option<&Path>,
    quiet: bool,
) -> Result<i32> {
    let mut options = ScanOptions::new().with_paths(paths);
    for (key, value) in tool_args {
        options = options.with_arg(&key, value);
    }

    let runner = Arc::new(ToolRunner::new(ctx));
    {
        let runner = runner.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling {}...", tool);
                runner.cancel(tool);
            }
        });
    }

    let progress = spinner(format!("Running {}...", tool.entry().display_name), quiet);
    let result = runner.run(tool, &options).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let report = runner
        .export(tool, format)
        .with_context(|| format!("No result recorded for {}", tool))??;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, report)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            if !quiet {
                println!("📄 Report written to {}", path.display());
            }
        }
        None => println!("{}", report),
    }

    if !quiet {
        print_scan_summary(&result);
    }

    Ok(match result.status {
        ScanStatus::Completed if result.summary.count(Severity::Error) > 0 => 2,
        ScanStatus::Completed => 0,
        _ => 1,
    })
}

fn print_scan_summary(result: &ScanResult) {
    let summary = &result.summary;
    eprintln!("\n📊 {} {}:", result.tool_id, result.status);
    eprintln!(
        "   Findings: {} in {} file(s)",
        summary.total, summary.files_affected
    );
    let counts: Vec<String> = [Severity::Error, Severity::Warning, Severity::Info, Severity::Hint]
        .into_iter()
        .map(|severity| format!("{} {}: {}", severity.emoji(), severity, summary.count(severity)))
        .collect();
    eprintln!("   {}", counts.join(" | "));
    if let Some(duration) = result.duration_seconds() {
        eprintln!("   Duration: {:.1}s", duration);
    }
    if let Some(ref error) = result.error {
        eprintln!("   ❌ {}", error);
    }
}

struct ChatOptions {
    message: String,
    history: Option<PathBuf>,
    save_history: Option<PathBuf>,
    auto_approve: bool,
    quiet: bool,
}

fn load_history(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse history file: {}", path.display()))
}

/// Ask the user on the terminal. Anything but y/yes is a denial.
async fn confirm(description: &str) -> Result<bool> {
    eprint!("\n❓ Allow: {}? [y/N] ", description);
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("Confirmation prompt failed")?
    .context("Failed to read confirmation")?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Host loop for one agent run.
async fn run_chat(ctx: ToolContext, agent_config: AgentConfig, chat: ChatOptions) -> Result<i32> {
    let history = match chat.history {
        Some(ref path) if path.exists() => load_history(path)?,
        Some(ref path) => {
            debug!("History file {} does not exist yet", path.display());
            Vec::new()
        }
        None => Vec::new(),
    };

    let provider = ctx.provider.clone();
    if !provider.is_available().await {
        anyhow::bail!(
            "Ollama is not reachable at {}. Is `ollama serve` running?",
            ctx.config.model.ollama_url
        );
    }

    info!(
        "Agent limits: {} turn(s), {} token(s), {} tool(s)",
        agent_config.max_turns(),
        agent_config.max_token_budget(),
        agent_config.tools().len()
    );

    let runner = ToolRunner::new(ctx);
    let mut run = AgentRun::new(provider, agent_config, history, chat.message.as_str());
    debug!("Starting agent run with {} message(s)", run.messages().len());
    let cancel = run.cancellation_token();
    cancel_on_ctrl_c(cancel.clone());

    let mut exit_code = 1;
    let mut action = run.start().await;

    while let Some(current) = action {
        action = match current {
            AgentAction::ToolCall {
                tool_id,
                call_id,
                args,
            } => {
                let progress = spinner(format!("🔧 {}...", tool_id.entry().display_name), chat.quiet);
                let result = runner.run_for_agent(tool_id, &call_id, &args, &cancel).await;
                if let Some(pb) = progress {
                    pb.finish_and_clear();
                }
                run.resume(Some(result)).await
            }
            AgentAction::ConfirmationRequired {
                tool_id,
                call_id,
                args,
                description,
            } => {
                let approved = chat.auto_approve || confirm(&description).await?;
                if approved {
                    info!("Running {} ({})", tool_id, call_id);
                    let result = runner.run_for_agent(tool_id, &call_id, &args, &cancel).await;
                    run.resume(Some(result)).await
                } else {
                    info!("User denied {}", tool_id);
                    run.resume(None).await
                }
            }
            AgentAction::Response { content, usage } => {
                println!("\n{}\n", content.trim());
                if !chat.quiet {
                    eprintln!(
                        "   Tokens: {} in / {} out",
                        usage.total_input_tokens, usage.total_output_tokens
                    );
                }
                exit_code = 0;
                None
            }
            AgentAction::Error { message } => {
                let usage = run.usage();
                error!(
                    "Agent run failed after {} token(s): {}",
                    usage.total(),
                    message
                );
                eprintln!("\n❌ {}", message);
                None
            }
        };
    }

    if let Some(ref path) = chat.save_history {
        let history = run.into_history();
        let content =
            serde_json::to_string_pretty(&history).context("Failed to serialize history")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write history file: {}", path.display()))?;
        debug!("Saved {} message(s) to {}", history.len(), path.display());
    }

    Ok(exit_code)
}
