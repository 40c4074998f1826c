//! Markdown and JSON rendering of scan results.

use crate::models::{ExportFormat, Finding, ScanResult, ScanStatus, ScanSummary, Severity};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Render a scan result in the requested format.
pub fn export(result: &ScanResult, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(generate_markdown_report(result)),
        ExportFormat::Json => generate_json_report(result),
    }
}

/// Generate a JSON report.
pub fn generate_json_report(result: &ScanResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("Failed to serialize scan result")
}

/// Generate a Markdown report.
pub fn generate_markdown_report(result: &ScanResult) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "# {} Report\n\n",
        result.tool_id.entry().display_name
    ));
    output.push_str(&generate_metadata_section(result));

    if let Some(ref error) = result.error {
        if result.status != ScanStatus::Completed {
            output.push_str(&format!("> **{}:** {}\n\n", result.status, error));
        }
    }

    output.push_str(&generate_summary_section(&result.summary));
    output.push_str(&generate_findings_section(&result.findings));

    output
}

fn generate_metadata_section(result: &ScanResult) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Tool:** `{}`\n", result.tool_id));
    section.push_str(&format!("- **Status:** {}\n", result.status));
    section.push_str(&format!(
        "- **Started:** {}\n",
        result.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(duration) = result.duration_seconds() {
        section.push_str(&format!("- **Duration:** {:.1}s\n", duration));
    }
    section.push('\n');

    section
}

fn generate_summary_section(summary: &ScanSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| {} Error | {} Warning | {} Info | {} Hint | **Total** |\n",
        Severity::Error.emoji(),
        Severity::Warning.emoji(),
        Severity::Info.emoji(),
        Severity::Hint.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | **{}** |\n\n",
        summary.errors, summary.warnings, summary.infos, summary.hints, summary.total
    ));
    section.push_str(&format!("Files affected: {}\n\n", summary.files_affected));

    section
}

fn generate_findings_section(findings: &[Finding]) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");

    if findings.is_empty() {
        section.push_str("No findings.\n");
        return section;
    }

    let mut by_file: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_file
            .entry(finding.location.file.as_str())
            .or_default()
            .push(finding);
    }

    for (file, mut items) in by_file {
        let heading = if file.is_empty() { "(workspace)" } else { file };
        section.push_str(&format!("### {}\n\n", heading));

        // Most severe first, then by line
        items.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.location.start_line.cmp(&b.location.start_line))
        });

        for finding in items {
            section.push_str(&generate_finding_block(finding));
        }
    }

    section
}

fn generate_finding_block(finding: &Finding) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "#### {} **{}** {}\n\n",
        finding.severity.emoji(),
        finding.severity.to_string().to_uppercase(),
        finding.title
    ));

    if finding.location.start_line > 0 {
        block.push_str(&format!("**Lines:** {}\n\n", finding.location.line_range()));
    }

    if !finding.description.is_empty() {
        block.push_str(&finding.description);
        block.push_str("\n\n");
    }

    if let Some(ref fix) = finding.fix {
        if fix.replacement.is_empty() {
            block.push_str(&format!(
                "> **Suggested fix:** remove lines {}\n\n",
                fix.location.line_range()
            ));
        } else {
            block.push_str("> **Suggested fix:**\n\n```\n");
            block.push_str(&fix.replacement);
            block.push_str("\n```\n\n");
        }
    }

    block.push_str("---\n\n");

    block
}
