//! Auto commit: stage every change and propose a commit message.
//!
//! The tool stages files but never creates the commit. The proposal is
//! reported as a finding so the user can review and commit it themselves.

use super::{AnalysisTool, ScanContext, ToolContext, ToolError};
use crate::config::{CommitConfig, Enforcement};
use crate::git;
use crate::models::{Finding, Location, Severity};
use crate::registry::ToolId;
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lines of patch sent to the model.
pub const MAX_DIFF_LINES: usize = 400;
/// Characters of patch sent to the model.
pub const MAX_DIFF_CHARS: usize = 12_000;

pub struct CommitTool;

static CONVENTIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(feat|fix|docs|style|refactor|perf|test|build|ci|chore|revert)(\([^)]+\))?!?: \S")
        .unwrap()
});

/// First `max_lines` lines and at most `max_chars` characters of a patch.
pub fn cap_diff(patch: &str, max_lines: usize, max_chars: usize) -> String {
    let mut out = String::new();
    let mut truncated = false;

    for (i, line) in patch.lines().enumerate() {
        if i >= max_lines || out.len() + line.len() + 1 > max_chars {
            truncated = true;
            break;
        }
        out.push_str(line);
        out.push('\n');
    }

    if truncated {
        out.push_str("[diff truncated]\n");
    }
    out
}

/// Strip code fences, quotes and surrounding whitespace from a model reply.
pub fn clean_message(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .trim()
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    lines
        .join("\n")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// A rule the message breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: &'static str,
    pub message: String,
}

/// Check a message against the configured rules.
pub fn validate_message(message: &str, config: &CommitConfig) -> Vec<Violation> {
    let subject = message.lines().next().unwrap_or_default();
    let mut violations = Vec::new();

    if subject.trim().is_empty() {
        violations.push(Violation {
            rule: "empty_subject",
            message: "The commit message has no subject line.".to_string(),
        });
        return violations;
    }

    let length = subject.chars().count();
    if length > config.max_subject_length {
        violations.push(Violation {
            rule: "max_subject_length",
            message: format!(
                "Subject is {} characters; the limit is {}.",
                length, config.max_subject_length
            ),
        });
    }

    if let Some(ref prefix) = config.required_prefix {
        if !prefix.is_empty() && !subject.starts_with(prefix.as_str()) {
            violations.push(Violation {
                rule: "required_prefix",
                message: format!("Subject must start with \"{}\".", prefix),
            });
        }
    }

    if let Some(ref suffix) = config.required_suffix {
        if !suffix.is_empty() && !subject.trim_end().ends_with(suffix.as_str()) {
            violations.push(Violation {
                rule: "required_suffix",
                message: format!("Subject must end with \"{}\".", suffix),
            });
        }
    }

    violations
}

/// Whether the subject follows the conventional commit format.
pub fn is_conventional(message: &str) -> bool {
    let subject = message.lines().next().unwrap_or_default();
    CONVENTIONAL_RE.is_match(subject)
}

/// Outcome of the pre-commit dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Skipped,
    Missing,
    Passed,
    Failed(String),
}

impl HookOutcome {
    fn label(&self) -> String {
        match self {
            HookOutcome::Skipped => "skipped".to_string(),
            HookOutcome::Missing => "no pre-commit hook".to_string(),
            HookOutcome::Passed => "passed".to_string(),
            HookOutcome::Failed(output) => format!("failed: {}", output),
        }
    }
}

async fn run_pre_commit(workspace: &Path, scan: &ScanContext<'_>) -> anyhow::Result<HookOutcome> {
    let hook = git::hook_path(workspace, "pre-commit")?;
    if !hook.is_file() {
        return Ok(HookOutcome::Missing);
    }

    let mut command = Command::new(&hook);
    command
        .current_dir(git::root(workspace)?)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}", hook.display());
    let output = tokio::select! {
        _ = scan.cancel_token().cancelled() => return Err(ToolError::Cancelled.into()),
        output = command.output() => output,
    };

    match output {
        Ok(output) if output.status.success() => Ok(HookOutcome::Passed),
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            Ok(HookOutcome::Failed(text))
        }
        Err(e) => Ok(HookOutcome::Failed(format!("could not run hook: {}", e))),
    }
}

fn commit_prompt(stat: &str, patch: &str) -> String {
    format!(
        "Write a commit message for these staged changes.\n\n## Stat\n{}\n## Diff\n{}",
        stat,
        cap_diff(patch, MAX_DIFF_LINES, MAX_DIFF_CHARS)
    )
}

const COMMIT_SYSTEM_PROMPT: &str = "You write git commit messages in the conventional commit format: \
a subject line `type(scope): summary` under 72 characters, then optionally a blank line and a short body. \
Reply with the commit message only.";

#[async_trait]
impl AnalysisTool for CommitTool {
    fn id(&self) -> ToolId {
        ToolId::Commit
    }

    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
        let settings = &ctx.config.commit;
        let workspace = ctx.workspace.as_path();

        let changed = git::changed_files(workspace)?;
        if changed.is_empty() {
            info!("commit: working tree is clean");
            return Ok(vec![Finding::new(
                ToolId::Commit,
                "commit:nothing",
                "Nothing to commit",
                Location::workspace(),
                Severity::Info,
            )
            .with_description("The working tree has no changes.")]);
        }
        scan.checkpoint()?;

        git::stage_all(workspace)?;
        let diff = git::staged_diff(workspace)?;
        info!("commit: staged {} file(s)", diff.files.len());
        scan.checkpoint()?;

        let message = match scan
            .ask_model(ctx, COMMIT_SYSTEM_PROMPT, &commit_prompt(&diff.stat, &diff.patch))
            .await
        {
            Ok(reply) => clean_message(&reply),
            Err(e) => {
                scan.checkpoint()?;
                return Err(e).context("Failed to generate a commit message");
            }
        };
        scan.checkpoint()?;

        let severity = match settings.enforcement {
            Enforcement::Warn => Severity::Warning,
            Enforcement::Deny => Severity::Error,
        };

        let mut findings = Vec::new();
        for violation in validate_message(&message, settings) {
            findings.push(
                Finding::new(
                    ToolId::Commit,
                    format!("commit:rule:{}", violation.rule),
                    "Commit message breaks a project rule",
                    Location::workspace(),
                    severity,
                )
                .with_description(violation.message)
                .with_metadata("rule", violation.rule),
            );
        }

        if !is_conventional(&message) {
            findings.push(
                Finding::new(
                    ToolId::Commit,
                    "commit:conventional",
                    "Subject is not a conventional commit",
                    Location::workspace(),
                    Severity::Hint,
                )
                .with_description("Expected `type(scope): summary`, for example `fix(parser): handle empty input`."),
            );
        }

        let run_hooks = scan.arg_bool("run_hooks").unwrap_or(settings.run_hooks);
        let hook = if run_hooks {
            run_pre_commit(workspace, scan).await?
        } else {
            HookOutcome::Skipped
        };
        if let HookOutcome::Failed(ref output) = hook {
            warn!("commit: pre-commit hook failed");
            findings.push(
                Finding::new(
                    ToolId::Commit,
                    "commit:hook",
                    "Pre-commit hook failed",
                    Location::workspace(),
                    Severity::Warning,
                )
                .with_description(output.clone()),
            );
        }

        let subject = message.lines().next().unwrap_or_default().to_string();
        findings.insert(
            0,
            Finding::new(
                ToolId::Commit,
                "commit:proposal",
                format!("Proposed commit: {}", subject),
                Location::workspace(),
                Severity::Info,
            )
            .with_description(format!(
                "Staged {} file(s). Review and commit with:\n\n```\n{}\n```",
                diff.files.len(),
                message
            ))
            .with_metadata("message", message.as_str())
            .with_metadata(
                "files",
                Value::from(diff.files.iter().map(|f| Value::from(f.as_str())).collect::<Vec<_>>()),
            )
            .with_metadata("stat", diff.stat.as_str())
            .with_metadata("hook", hook.label()),
        );

        Ok(findings)
    }
}
