//! Comment pruner.
//!
//! Finds comments that have not been touched for a long time and asks the
//! model which comments could be removed or rewritten. Files are never
//! edited; suggestions carry a [`SuggestedFix`] the user may apply.

use super::{analysis_failure, skipped_findings, AnalysisTool, ScanContext, ToolContext, ToolError};
use crate::git;
use crate::models::{Finding, Location, Severity, SuggestedFix};
use crate::registry::ToolId;
use crate::scanner::Language;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub struct CommentsTool;

/// A contiguous comment in a source file (1-based, inclusive lines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentBlock {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// Tool and compiler directives that only look like comments.
const DIRECTIVE_MARKERS: &[&str] = &[
    "#!",
    "eslint-",
    "@ts-",
    "prettier-ignore",
    "noqa",
    "pylint:",
    "type:",
    "coding:",
    "SPDX-License-Identifier",
];

fn is_directive(text: &str) -> bool {
    DIRECTIVE_MARKERS.iter().any(|marker| text.contains(marker))
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// Consecutive full-line comments starting with `marker`, merged into blocks.
fn line_comments(content: &str, marker: &str) -> Vec<CommentBlock> {
    let mut blocks: Vec<CommentBlock> = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with(marker) || is_directive(trimmed) {
            continue;
        }
        let line_no = i + 1;
        match blocks.last_mut() {
            Some(last) if last.end_line + 1 == line_no => {
                last.end_line = line_no;
                last.text.push('\n');
                last.text.push_str(trimmed);
            }
            _ => blocks.push(CommentBlock {
                start_line: line_no,
                end_line: line_no,
                text: trimmed.to_string(),
            }),
        }
    }
    blocks
}

fn block_comments(content: &str) -> Vec<CommentBlock> {
    BLOCK_COMMENT_RE
        .find_iter(content)
        .filter(|m| !is_directive(m.as_str()))
        .map(|m| CommentBlock {
            start_line: line_of(content, m.start()),
            end_line: line_of(content, m.end()),
            text: m.as_str().to_string(),
        })
        .collect()
}

/// Comment blocks in a file, ordered by line, with overlapping ranges removed
/// (the earlier block wins) and directives skipped.
pub fn extract_comments(file: &str, content: &str) -> Vec<CommentBlock> {
    let mut blocks = match Language::from_path(file) {
        Language::Python => line_comments(content, "#"),
        Language::JavaScript | Language::Rust | Language::CLike => {
            let mut blocks = block_comments(content);
            blocks.extend(line_comments(content, "//"));
            blocks
        }
        Language::Other => return Vec::new(),
    };

    blocks.sort_by_key(|b| b.start_line);

    let mut kept: Vec<CommentBlock> = Vec::new();
    for block in blocks {
        if kept.last().is_some_and(|last| block.start_line <= last.end_line) {
            continue;
        }
        kept.push(block);
    }
    kept
}

/// A model suggestion for a comment range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentSuggestion {
    Remove {
        start: usize,
        end: usize,
        reason: String,
    },
    Rewrite {
        start: usize,
        end: usize,
        reason: String,
        replacement: String,
    },
}

fn parse_range(start: &str, end: &str) -> Option<(usize, usize)> {
    let start = start.trim().parse::<usize>().ok()?;
    let end = end.trim().parse::<usize>().ok()?;
    if start == 0 || end < start {
        return None;
    }
    Some((start, end))
}

/// `REMOVE|start|end|reason` and `REWRITE|start|end|reason|replacement` lines.
/// Lines that do not parse are skipped.
pub fn parse_suggestions(response: &str) -> Vec<CommentSuggestion> {
    response
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("REMOVE|") {
                let parts: Vec<&str> = rest.splitn(3, '|').collect();
                let [start, end, reason] = parts[..] else {
                    return None;
                };
                let (start, end) = parse_range(start, end)?;
                return Some(CommentSuggestion::Remove {
                    start,
                    end,
                    reason: reason.trim().to_string(),
                });
            }
            if let Some(rest) = line.strip_prefix("REWRITE|") {
                let parts: Vec<&str> = rest.splitn(4, '|').collect();
                let [start, end, reason, replacement] = parts[..] else {
                    return None;
                };
                let (start, end) = parse_range(start, end)?;
                let replacement = replacement.trim().replace("\\n", "\n");
                if replacement.is_empty() {
                    return None;
                }
                return Some(CommentSuggestion::Rewrite {
                    start,
                    end,
                    reason: reason.trim().to_string(),
                    replacement,
                });
            }
            None
        })
        .collect()
}

fn suggestion_finding(file: &str, suggestion: CommentSuggestion) -> Finding {
    let (kind, start, end, reason, replacement) = match suggestion {
        CommentSuggestion::Remove { start, end, reason } => ("remove", start, end, reason, String::new()),
        CommentSuggestion::Rewrite {
            start,
            end,
            reason,
            replacement,
        } => ("rewrite", start, end, reason, replacement),
    };
    let location = Location::lines(file, start, end);
    let title = if kind == "remove" {
        "Comment can be removed"
    } else {
        "Comment could be rewritten"
    };

    Finding::new(
        ToolId::Comments,
        format!("comments:{}:{}:{}-{}", kind, file, start, end),
        title,
        location.clone(),
        Severity::Hint,
    )
    .with_description(reason)
    .with_fix(SuggestedFix {
        replacement,
        location,
    })
    .with_metadata("action", kind)
}

fn stale_finding(file: &str, block: &CommentBlock, age_days: i64) -> Finding {
    Finding::new(
        ToolId::Comments,
        format!("comments:stale:{}:{}", file, block.start_line),
        "Stale comment",
        Location::lines(file, block.start_line, block.end_line),
        Severity::Info,
    )
    .with_description(format!(
        "This comment has not changed in {} days. Check that it still describes the code.",
        age_days
    ))
    .with_metadata("age_days", age_days)
}

/// Age in days of the newest line in `block`, or `None` when any of its lines
/// is not committed yet.
fn block_age(block: &CommentBlock, times: &[Option<DateTime<Utc>>], now: DateTime<Utc>) -> Option<i64> {
    let lines = times.get(block.start_line - 1..block.end_line)?;
    let mut newest = None;
    for time in lines {
        newest = newest.max(Some((*time)?));
    }
    newest.map(|when| (now - when).num_days())
}

fn review_prompt(file: &str, blocks: &[CommentBlock]) -> String {
    let mut prompt = format!("Comments in {}:\n\n", file);
    for block in blocks {
        prompt.push_str(&format!(
            "[lines {}-{}]\n{}\n\n",
            block.start_line, block.end_line, block.text
        ));
    }
    prompt
}

const REVIEW_SYSTEM_PROMPT: &str = "You prune source code comments. For a comment that adds nothing \
(restates the code, commented-out code, obsolete notes) answer REMOVE|<start>|<end>|<reason>. \
For a comment that is useful but unclear answer REWRITE|<start>|<end>|<reason>|<new comment text>, \
using \\n for line breaks and keeping the comment syntax. Use the line numbers shown. \
Leave good comments alone and output nothing else.";

#[async_trait]
impl AnalysisTool for CommentsTool {
    fn id(&self) -> ToolId {
        ToolId::Comments
    }

    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
        let settings = &ctx.config.comments;
        let stale_days = scan.arg_i64("stale_days").unwrap_or(settings.stale_days);
        if stale_days < 0 {
            return Err(ToolError::InvalidArgument {
                name: "stale_days".to_string(),
                reason: format!("must not be negative, got {}", stale_days),
            }
            .into());
        }

        let collected = ctx.scanner(scan.paths()).collect_files()?;
        let commented: Vec<(&String, &String, Vec<CommentBlock>)> = collected
            .contents
            .iter()
            .map(|(path, content)| (path, content, extract_comments(path, content)))
            .filter(|(_, _, blocks)| !blocks.is_empty())
            .collect();
        debug!("comments: {} file(s) with comments", commented.len());
        scan.checkpoint()?;

        let mut findings = skipped_findings(ToolId::Comments, &collected.skipped);
        let mut stale = 0;

        if git::is_repository(&ctx.workspace) {
            let now = Utc::now();
            for (path, content, blocks) in &commented {
                let times = match git::blame_lines(&ctx.workspace, path, content) {
                    Ok(times) => times,
                    Err(e) => {
                        warn!("Blame failed for {}: {:#}", path, e);
                        findings.push(analysis_failure(
                            ToolId::Comments,
                            path,
                            Location::line(path.as_str(), 1),
                            format!("{:#}", e),
                        ));
                        continue;
                    }
                };
                for block in blocks {
                    // Uncommitted lines are new, never stale
                    if let Some(age) = block_age(block, &times, now) {
                        if age > stale_days {
                            findings.push(stale_finding(path, block, age));
                            stale += 1;
                        }
                    }
                }
                scan.checkpoint()?;
            }
        } else {
            debug!("comments: not a git repository, skipping age check");
        }
        info!("comments: {} stale comment(s)", stale);

        for (path, _, blocks) in commented.iter().take(settings.max_review_files) {
            let sample = &blocks[..blocks.len().min(settings.max_comments_per_file)];
            match scan
                .ask_model(ctx, REVIEW_SYSTEM_PROMPT, &review_prompt(path, sample))
                .await
            {
                Ok(response) => {
                    findings.extend(
                        parse_suggestions(&response)
                            .into_iter()
                            .map(|s| suggestion_finding(path, s)),
                    );
                }
                Err(e) => warn!("comments review skipped for {}: {}", path, e),
            }
            scan.checkpoint()?;
        }

        Ok(findings)
    }
}
