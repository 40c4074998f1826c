//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.aidev.toml` files.

use crate::provider::OperatingMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the workspace.
pub const CONFIG_FILE_NAME: &str = ".aidev.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent loop limits.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Scanner settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Lint tool settings.
    #[serde(default)]
    pub lint: LintConfig,

    /// Comment pruning settings.
    #[serde(default)]
    pub comments: CommentsConfig,

    /// Commit proposal settings.
    #[serde(default)]
    pub commit: CommitConfig,

    /// PR review settings.
    #[serde(default)]
    pub pr_review: PrReviewConfig,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model used for the high tier.
    #[serde(default = "default_high_model")]
    pub high: String,

    /// Model used for the mid tier.
    #[serde(default = "default_mid_model")]
    pub mid: String,

    /// Model used for the low tier.
    #[serde(default = "default_low_model")]
    pub low: String,

    /// Operating mode used to pick a tier per request.
    #[serde(default)]
    pub mode: OperatingMode,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            high: default_high_model(),
            mid: default_mid_model(),
            low: default_low_model(),
            mode: OperatingMode::default(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_high_model() -> String {
    "qwen2.5-coder:32b".to_string()
}

fn default_mid_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

fn default_low_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

/// Agent loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum model round-trips per run.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Maximum input + output tokens per run.
    #[serde(default = "default_max_token_budget")]
    pub max_token_budget: u64,

    /// Custom system prompt. Empty uses the built-in prompt.
    #[serde(default)]
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_token_budget: default_max_token_budget(),
            system_prompt: String::new(),
        }
    }
}

fn default_max_turns() -> usize {
    10
}

fn default_max_token_budget() -> u64 {
    100_000
}

/// File scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Maximum files to analyze.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to exclude.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_max_files() -> usize {
    500
}

pub(crate) fn default_extensions() -> Vec<String> {
    vec!["rs", "py", "js", "ts", "jsx", "tsx", "mjs", "cjs", "go", "java"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub(crate) fn default_excludes() -> Vec<String> {
    vec![
        ".git",
        "target",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "out",
        "__pycache__",
        ".venv",
        "venv",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> usize {
    512 * 1024
}

/// Lint tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintConfig {
    /// Command used to run ESLint. Extra words are passed as leading arguments.
    #[serde(default = "default_eslint")]
    pub eslint_command: String,

    /// Command used to run pylint.
    #[serde(default = "default_pylint")]
    pub pylint_command: String,

    /// Run the model review pass after the linters.
    #[serde(default = "default_true")]
    pub model_review: bool,

    /// Files sampled for the model review.
    #[serde(default = "default_review_files")]
    pub max_review_files: usize,

    /// Characters kept per sampled file.
    #[serde(default = "default_review_chars")]
    pub max_review_chars: usize,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            eslint_command: default_eslint(),
            pylint_command: default_pylint(),
            model_review: true,
            max_review_files: default_review_files(),
            max_review_chars: default_review_chars(),
        }
    }
}

fn default_eslint() -> String {
    "npx eslint".to_string()
}

fn default_pylint() -> String {
    "pylint".to_string()
}

fn default_true() -> bool {
    true
}

fn default_review_files() -> usize {
    5
}

fn default_review_chars() -> usize {
    4000
}

/// Comment pruning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsConfig {
    /// Comments older than this many days are flagged as stale.
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,

    /// Comments per file sent to the model.
    #[serde(default = "default_comments_per_file")]
    pub max_comments_per_file: usize,

    /// Files whose comments are sent to the model.
    #[serde(default = "default_review_files")]
    pub max_review_files: usize,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            stale_days: default_stale_days(),
            max_comments_per_file: default_comments_per_file(),
            max_review_files: default_review_files(),
        }
    }
}

fn default_stale_days() -> i64 {
    365
}

fn default_comments_per_file() -> usize {
    40
}

/// How commit message violations are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    #[default]
    Warn,
    Deny,
}

/// Commit proposal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Maximum length of the subject line.
    #[serde(default = "default_subject_length")]
    pub max_subject_length: usize,

    /// Text the subject must start with, if set.
    #[serde(default)]
    pub required_prefix: Option<String>,

    /// Text the subject must end with, if set.
    #[serde(default)]
    pub required_suffix: Option<String>,

    /// Whether violations are warnings or errors.
    #[serde(default)]
    pub enforcement: Enforcement,

    /// Dry-run the pre-commit hook.
    #[serde(default)]
    pub run_hooks: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_subject_length: default_subject_length(),
            required_prefix: None,
            required_suffix: None,
            enforcement: Enforcement::default(),
            run_hooks: false,
        }
    }
}

fn default_subject_length() -> usize {
    72
}

/// PR review settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrReviewConfig {
    /// Branches a PR would merge into, in priority order.
    #[serde(default = "default_target_branches")]
    pub target_branches: Vec<String>,
}

impl Default for PrReviewConfig {
    fn default() -> Self {
        Self {
            target_branches: default_target_branches(),
        }
    }
}

fn default_target_branches() -> Vec<String> {
    vec!["main", "master", "develop"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from a workspace directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_from_workspace(workspace: &Path) -> Result<Option<Self>> {
        let config_path = workspace.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }

        // A single --model pins every tier
        if let Some(ref model) = args.model {
            self.model.high = model.clone();
            self.model.mid = model.clone();
            self.model.low = model.clone();
        }

        if let Some(mode) = args.mode {
            self.model.mode = mode;
        }

        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.low, "llama3.2:latest");
        assert_eq!(config.agent.max_turns, 10);
        assert_eq!(config.agent.max_token_budget, 100_000);
        assert!(config.agent.system_prompt.is_empty());
        assert_eq!(config.comments.stale_days, 365);
        assert_eq!(config.commit.enforcement, Enforcement::Warn);
        assert_eq!(config.pr_review.target_branches, vec!["main", "master", "develop"]);
        assert!(config.scanner.extensions.contains(&"ts".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[model]
mid = "codellama:34b"
mode = "performance"
temperature = 0.2

[agent]
max_turns = 4
system_prompt = "You are terse."

[commit]
max_subject_length = 50
required_prefix = "feat"
enforcement = "deny"

[pr_review]
target_branches = ["trunk"]
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.model.mid, "codellama:34b");
        assert_eq!(config.model.mode, OperatingMode::Performance);
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.agent.max_turns, 4);
        assert_eq!(config.agent.max_token_budget, 100_000);
        assert_eq!(config.agent.system_prompt, "You are terse.");
        assert_eq!(config.commit.max_subject_length, 50);
        assert_eq!(config.commit.required_prefix.as_deref(), Some("feat"));
        assert_eq!(config.commit.enforcement, Enforcement::Deny);
        assert_eq!(config.pr_review.target_branches, vec!["trunk"]);
        // untouched sections keep defaults
        assert_eq!(config.scanner.max_files, 500);
    }

    #[test]
    fn test_load_from_workspace() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load_from_workspace(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[comments]\nstale_days = 30\n").unwrap();
        let config = Config::load_from_workspace(dir.path()).unwrap().unwrap();
        assert_eq!(config.comments.stale_days, 30);

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[comments\n").unwrap();
        assert!(Config::load_from_workspace(dir.path()).is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[agent]"));
        assert!(toml_str.contains("[commit]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.max_turns, 10);
    }
}
