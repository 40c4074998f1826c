//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::ExportFormat;
use crate::provider::OperatingMode;
use crate::registry::ToolId;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// AIDev - agentic code assistant with local analysis tools
///
/// Chat with a local model that can run dead code, lint, comment, commit
/// and PR review tools on your workspace, or run the tools directly.
///
/// Examples:
///   aidev chat "are there unused exports in src/?"
///   aidev chat --yes "stage my changes and propose a commit message"
///   aidev scan lint --path src --format json --output lint.json
///   aidev scan tldr --arg branch=feature/login
///   aidev init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    ///
    /// If not specified, looks for .aidev.toml in the workspace
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Workspace directory the tools operate on
    #[arg(short, long, global = true, default_value = ".", value_name = "DIR")]
    pub workspace: PathBuf,

    /// Ollama API endpoint URL
    #[arg(long, global = true, env = "OLLAMA_URL", value_name = "URL")]
    pub ollama_url: Option<String>,

    /// Use this model for every tier
    #[arg(short, long, global = true, env = "AIDEV_MODEL")]
    pub model: Option<String>,

    /// Operating mode (picks the model tier per request)
    #[arg(long, global = true, value_enum)]
    pub mode: Option<OperatingMode>,

    /// Request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Ask the agent something; it may call tools to answer
    Chat {
        /// The message to send
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,

        /// JSON file with earlier conversation to replay
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Write the conversation to this JSON file afterwards
        #[arg(long, value_name = "FILE")]
        save_history: Option<PathBuf>,

        /// Approve tools that need confirmation without asking
        #[arg(short, long)]
        yes: bool,

        /// Maximum model round trips
        #[arg(long, value_name = "COUNT")]
        max_turns: Option<usize>,

        /// Token budget for the whole run
        #[arg(long, value_name = "TOKENS")]
        max_tokens: Option<u64>,
    },

    /// Run one analysis tool directly
    Scan {
        /// Tool to run (dead-code, lint, comments, commit, tldr)
        tool: ToolId,

        /// Limit the scan to these files or directories
        #[arg(short, long = "path", value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Output format (markdown, json)
        #[arg(short, long, default_value = "markdown", value_name = "FORMAT")]
        format: OutputFormat,

        /// Write the report here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Tool argument as key=value; values are parsed as JSON when possible
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        tool_args: Vec<(String, Value)>,
    },

    /// List the registered tools
    Tools,

    /// List models offered by the provider
    Models,

    /// Generate a default .aidev.toml configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Markdown => ExportFormat::Markdown,
            OutputFormat::Json => ExportFormat::Json,
        }
    }
}

/// Parse `key=value`. The value is JSON if it parses, otherwise a plain string.
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        // init-config may create the workspace file, everything else needs the directory
        if !matches!(self.command, Commands::InitConfig { .. }) && !self.workspace.is_dir() {
            return Err(format!(
                "Workspace is not a directory: {}",
                self.workspace.display()
            ));
        }

        if let Commands::Chat {
            ref message,
            max_turns,
            max_tokens,
            ..
        } = self.command
        {
            if message.iter().all(|part| part.trim().is_empty()) {
                return Err("Message must not be empty".to_string());
            }
            if max_turns == Some(0) {
                return Err("Max turns must be at least 1".to_string());
            }
            if max_tokens == Some(0) {
                return Err("Max tokens must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv.iter().copied()).unwrap()
    }

    #[test]
    fn test_parse_chat() {
        let args = parse(&["aidev", "chat", "find", "dead", "code", "--yes", "--max-turns", "3"]);
        match &args.command {
            Commands::Chat {
                message,
                yes,
                max_turns,
                ..
            } => {
                assert_eq!(message.join(" "), "find dead code");
                assert!(*yes);
                assert_eq!(*max_turns, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_scan() {
        let args = parse(&[
            "aidev", "scan", "dead-code", "-p", "src", "--path", "lib", "--format", "json",
            "--arg", "skip_review=true", "--arg", "branch=feature/x",
        ]);
        match args.command {
            Commands::Scan {
                tool,
                paths,
                format,
                tool_args,
                ..
            } => {
                assert_eq!(tool, ToolId::DeadCode);
                assert_eq!(paths, vec![PathBuf::from("src"), PathBuf::from("lib")]);
                assert_eq!(ExportFormat::from(format), ExportFormat::Json);
                assert_eq!(
                    tool_args,
                    vec![
                        ("skip_review".to_string(), json!(true)),
                        ("branch".to_string(), json!("feature/x")),
                    ]
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let err = Args::try_parse_from(["aidev", "scan", "frobnicate"]).unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("n=5").unwrap(), ("n".to_string(), json!(5)));
        assert_eq!(
            parse_key_value("targets=[\"main\"]").unwrap(),
            ("targets".to_string(), json!(["main"]))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["aidev", "tools", "--verbose", "--quiet"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_limits() {
        let args = parse(&["aidev", "chat", "hi", "--max-turns", "0"]);
        assert!(args.validate().is_err());

        let args = parse(&["aidev", "models", "--ollama-url", "localhost:11434"]);
        assert!(args.validate().is_err());

        let args = parse(&["aidev", "tools", "--workspace", "/definitely/not/here"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["aidev", "tools"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
