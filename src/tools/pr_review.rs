//! PR review (TL;DR).
//!
//! Summarizes a branch that is ahead of one of the target branches. The
//! branch is checked out for the review; the original branch and any
//! uncommitted work are restored afterwards, whether the review succeeded,
//! failed or was cancelled.

use super::commit::{cap_diff, MAX_DIFF_CHARS, MAX_DIFF_LINES};
use super::{AnalysisTool, ScanContext, ToolContext};
use crate::git::{self, AheadBranch};
use crate::models::{Finding, Location, Severity};
use crate::registry::ToolId;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

/// Commits listed in the review prompt.
const MAX_LOG_ENTRIES: usize = 50;

const STASH_MESSAGE: &str = "aidev: pr review";

pub struct PrReviewTool;

/// Split a model reply into the summary paragraph(s) and bullet highlights.
pub fn parse_review(response: &str) -> (String, Vec<String>) {
    let mut summary = Vec::new();
    let mut highlights = Vec::new();

    for line in response.lines() {
        let trimmed = line.trim();
        let bullet = ["- ", "* ", "• "]
            .iter()
            .find_map(|marker| trimmed.strip_prefix(marker));

        match bullet {
            Some(text) if !text.trim().is_empty() => highlights.push(text.trim().to_string()),
            Some(_) => {}
            None if highlights.is_empty() && !trimmed.starts_with('#') => summary.push(trimmed),
            None => {}
        }
    }

    (summary.join("\n").trim().to_string(), highlights)
}

fn review_prompt(ahead: &AheadBranch, log: &[String], stat: &str, patch: &str) -> String {
    format!(
        "Summarize the pull request from `{}` into `{}` ({} commit(s)).\n\n## Commits\n{}\n\n## Stat\n{}\n## Diff\n{}",
        ahead.branch,
        ahead.target,
        ahead.ahead,
        log.join("\n"),
        stat,
        cap_diff(patch, MAX_DIFF_LINES, MAX_DIFF_CHARS)
    )
}

const REVIEW_SYSTEM_PROMPT: &str = "You review pull requests. Start with a short summary paragraph of what \
the branch changes and why. Then list the most important review highlights (risks, missing tests, \
notable design decisions) as bullet points starting with \"- \".";

fn info_finding(id: &str, title: String, description: String) -> Finding {
    Finding::new(ToolId::Tldr, id, title, Location::workspace(), Severity::Info)
        .with_description(description)
}

/// Diff, log and model summary of a branch that is already checked out.
async fn review_branch(
    ctx: &ToolContext,
    scan: &ScanContext<'_>,
    ahead: &AheadBranch,
) -> anyhow::Result<Vec<Finding>> {
    let workspace = ctx.workspace.as_path();
    let diff = git::branch_diff(workspace, &ahead.branch, &ahead.target)?;
    let log = git::commit_log(workspace, &ahead.branch, &ahead.target, MAX_LOG_ENTRIES)?;
    debug!("tldr: {} file(s), {} commit(s)", diff.files.len(), log.len());
    scan.checkpoint()?;

    let prompt = review_prompt(ahead, &log, &diff.stat, &diff.patch);
    let response = match scan.ask_model(ctx, REVIEW_SYSTEM_PROMPT, &prompt).await {
        Ok(response) => response,
        Err(e) => {
            scan.checkpoint()?;
            return Err(e).context("Failed to summarize the branch");
        }
    };
    scan.checkpoint()?;

    let (summary, highlights) = parse_review(&response);
    let summary = if summary.is_empty() {
        response.trim().to_string()
    } else {
        summary
    };

    let mut findings = vec![info_finding(
        "tldr:summary",
        format!("TL;DR: {} -> {}", ahead.branch, ahead.target),
        summary,
    )
    .with_metadata("branch", ahead.branch.as_str())
    .with_metadata("target", ahead.target.as_str())
    .with_metadata("commits", log.len())
    .with_metadata("files_changed", diff.files.len())
    .with_metadata("stat", diff.stat.as_str())];

    for (i, highlight) in highlights.into_iter().enumerate() {
        findings.push(
            Finding::new(
                ToolId::Tldr,
                format!("tldr:highlight:{}", i + 1),
                highlight.clone(),
                Location::workspace(),
                Severity::Hint,
            )
            .with_description(highlight),
        );
    }

    Ok(findings)
}

/// Put the repository back the way the review found it.
fn restore(workspace: &Path, original: Option<&str>, switched: bool, stashed: bool) -> anyhow::Result<()> {
    let mut failure = None;

    if switched {
        if let Some(branch) = original {
            if let Err(e) = git::checkout_branch(workspace, branch) {
                warn!("tldr: could not return to {}: {:#}", branch, e);
                failure = Some(e.context(format!("Could not return to branch {}", branch)));
            }
        }
    }

    if stashed {
        if let Err(e) = git::stash_pop(workspace) {
            warn!("tldr: could not restore stashed changes: {:#}", e);
            failure = Some(e.context("Uncommitted changes are still in the stash"));
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait]
impl AnalysisTool for PrReviewTool {
    fn id(&self) -> ToolId {
        ToolId::Tldr
    }

    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
        let workspace = ctx.workspace.as_path();
        let targets = scan
            .arg_strings("target_branches")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| ctx.config.pr_review.target_branches.clone());

        let ahead = match scan.arg_str("branch") {
            Some(branch) => git::ahead_of(workspace, branch, &targets)?,
            None => git::find_branch_ahead(workspace, &targets)?,
        };
        let Some(ahead) = ahead else {
            let subject = scan
                .arg_str("branch")
                .map(|b| format!("Branch {} is not ahead of", b))
                .unwrap_or_else(|| "No local branch is ahead of".to_string());
            return Ok(vec![info_finding(
                "tldr:nothing",
                "Nothing to review".to_string(),
                format!("{} {}.", subject, targets.join(", ")),
            )]);
        };
        info!("tldr: reviewing {} against {}", ahead.branch, ahead.target);
        scan.checkpoint()?;

        let original = git::current_branch(workspace)?;
        if original.is_none() {
            anyhow::bail!("HEAD is detached; check out a branch before running a review");
        }
        let needs_switch = original.as_deref() != Some(ahead.branch.as_str());

        let stashed = needs_switch && git::stash_save(workspace, STASH_MESSAGE)?;
        let mut switched = false;

        let outcome = if needs_switch {
            match git::checkout_branch(workspace, &ahead.branch) {
                Ok(()) => {
                    switched = true;
                    review_branch(ctx, scan, &ahead).await
                }
                Err(e) => Err(e),
            }
        } else {
            review_branch(ctx, scan, &ahead).await
        };

        let restored = restore(workspace, original.as_deref(), switched, stashed);

        match (outcome, restored) {
            (Ok(findings), Ok(())) => Ok(findings),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }
}
