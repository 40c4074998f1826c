//! Lint tool: ESLint and Pylint output plus an optional model review.

use super::{analysis_failure, skipped_findings, AnalysisTool, ScanContext, ToolContext, ToolError};
use crate::models::{Finding, Location, Severity};
use crate::registry::ToolId;
use crate::scanner::Language;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct LintTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFile {
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    rule_id: Option<String>,
    severity: u8,
    message: String,
    #[serde(default)]
    line: usize,
    column: Option<usize>,
    end_line: Option<usize>,
    end_column: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PylintMessage {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    line: usize,
    column: Option<usize>,
    #[serde(rename = "endLine")]
    end_line: Option<usize>,
    #[serde(rename = "endColumn")]
    end_column: Option<usize>,
    symbol: Option<String>,
    message: String,
    #[serde(rename = "message-id")]
    message_id: Option<String>,
}

/// Path relative to the workspace, `/`-separated. Paths outside it are kept as given.
fn relativize(root: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    let relative = candidate
        .strip_prefix(root)
        .map(Path::to_path_buf)
        .ok()
        .or_else(|| {
            let root = std::fs::canonicalize(root).ok()?;
            let full = std::fs::canonicalize(candidate).ok()?;
            full.strip_prefix(&root).map(Path::to_path_buf).ok()
        });
    match relative {
        Some(rel) => rel.to_string_lossy().replace('\\', "/"),
        None => path.to_string(),
    }
}

fn location(
    file: String,
    line: usize,
    column: Option<usize>,
    end_line: Option<usize>,
    end_column: Option<usize>,
) -> Location {
    let start = line.max(1);
    Location {
        file,
        start_line: start,
        end_line: end_line.unwrap_or(start).max(start),
        start_column: column,
        end_column,
    }
}

/// Findings from `eslint --format json` output.
pub fn parse_eslint(output: &str, root: &Path) -> Result<Vec<Finding>, serde_json::Error> {
    let files: Vec<EslintFile> = serde_json::from_str(output)?;

    let mut findings = Vec::new();
    for file in files {
        let path = relativize(root, &file.file_path);
        for msg in file.messages {
            let severity = if msg.severity >= 2 {
                Severity::Error
            } else {
                Severity::Warning
            };
            let rule = msg.rule_id.unwrap_or_else(|| "eslint".to_string());
            findings.push(
                Finding::new(
                    ToolId::Lint,
                    format!("lint:eslint:{}:{}:{}", path, msg.line, findings.len()),
                    format!("{} ({})", msg.message, rule),
                    location(path.clone(), msg.line, msg.column, msg.end_line, msg.end_column),
                    severity,
                )
                .with_description(msg.message)
                .with_metadata("source", "eslint")
                .with_metadata("rule", rule),
            );
        }
    }
    Ok(findings)
}

/// Findings from `pylint --output-format=json` output.
pub fn parse_pylint(output: &str, root: &Path) -> Result<Vec<Finding>, serde_json::Error> {
    let messages: Vec<PylintMessage> = serde_json::from_str(output)?;

    Ok(messages
        .into_iter()
        .enumerate()
        .map(|(i, msg)| {
            let severity = match msg.kind.as_str() {
                "error" | "fatal" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let path = relativize(root, &msg.path);
            let rule = msg
                .symbol
                .or(msg.message_id)
                .unwrap_or_else(|| "pylint".to_string());
            Finding::new(
                ToolId::Lint,
                format!("lint:pylint:{}:{}:{}", path, msg.line, i),
                format!("{} ({})", msg.message, rule),
                location(path, msg.line, msg.column, msg.end_line, msg.end_column),
                severity,
            )
            .with_description(msg.message)
            .with_metadata("source", "pylint")
            .with_metadata("rule", rule)
        })
        .collect())
}

/// `ISSUE|file|line|description` and `SUGGESTION|file|line|description` lines.
pub fn parse_review(response: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in response.lines() {
        let parts: Vec<&str> = line.trim().splitn(4, '|').map(str::trim).collect();
        let [kind, file, line_no, description] = parts[..] else {
            continue;
        };
        let (severity, title) = match kind {
            "ISSUE" => (Severity::Warning, "Review issue"),
            "SUGGESTION" => (Severity::Hint, "Review suggestion"),
            _ => continue,
        };
        let Ok(line_no) = line_no.parse::<usize>() else {
            continue;
        };
        if file.is_empty() || description.is_empty() {
            continue;
        }

        findings.push(
            Finding::new(
                ToolId::Lint,
                format!("lint:review:{}:{}:{}", file, line_no, findings.len()),
                format!("{}: {}", title, description),
                Location::line(file, line_no.max(1)),
                severity,
            )
            .with_description(description)
            .with_metadata("source", "model"),
        );
    }
    findings
}

/// Run a linter command and return its stdout, or why it produced none.
async fn run_linter(
    command_line: &str,
    extra_args: &[&str],
    files: &[String],
    root: &Path,
    scan: &ScanContext<'_>,
) -> Result<Result<String, String>, ToolError> {
    let mut words = command_line.split_whitespace();
    let Some(program) = words.next() else {
        return Ok(Err("no linter command configured".to_string()));
    };

    let mut command = Command::new(program);
    command
        .args(words)
        .args(extra_args)
        .args(files)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {} on {} file(s)", command_line, files.len());
    let output = tokio::select! {
        _ = scan.cancel_token().cancelled() => return Err(ToolError::Cancelled),
        output = command.output() => output,
    };

    match output {
        Ok(output) => {
            // Linters exit non-zero when they report problems
            if output.stdout.is_empty() && !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!("{} failed: {}", program, stderr);
                return Ok(Err(format!("{} exited with {}: {}", program, output.status, stderr)));
            }
            Ok(Ok(String::from_utf8_lossy(&output.stdout).into_owned()))
        }
        Err(e) => {
            warn!("Could not run {}: {}", program, e);
            Ok(Err(format!("Could not run {}: {}", program, e)))
        }
    }
}

type ParseFn = fn(&str, &Path) -> Result<Vec<Finding>, serde_json::Error>;

/// Run one linter over `files`. A linter that fails or prints garbage becomes
/// a single warning finding.
async fn lint_with(
    name: &str,
    command_line: &str,
    extra_args: &[&str],
    files: &[String],
    parse: ParseFn,
    ctx: &ToolContext,
    scan: &ScanContext<'_>,
) -> Result<Vec<Finding>, ToolError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let reason = match run_linter(command_line, extra_args, files, &ctx.workspace, scan).await? {
        Ok(output) => match parse(&output, &ctx.workspace) {
            Ok(findings) => return Ok(findings),
            Err(e) => {
                warn!("Could not parse {} output: {}", name, e);
                format!("Unreadable {} output: {}", name, e)
            }
        },
        Err(reason) => reason,
    };

    Ok(vec![analysis_failure(
        ToolId::Lint,
        &format!("{} file(s) with {}", files.len(), name),
        Location::workspace(),
        reason,
    )
    .with_metadata("source", name)])
}

fn review_prompt(files: &BTreeMap<String, String>, max_files: usize, max_chars: usize) -> String {
    let mut prompt = String::from("Review these source files for bugs and code quality problems.\n\n");
    for (path, content) in files.iter().take(max_files) {
        let sample: String = content.chars().take(max_chars).collect();
        prompt.push_str(&format!("=== {} ===\n", path));
        for (i, line) in sample.lines().enumerate() {
            prompt.push_str(&format!("{:>4} | {}\n", i + 1, line));
        }
        prompt.push('\n');
    }
    prompt
}

const REVIEW_SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. Report each problem on its own line as \
ISSUE|<file>|<line>|<description> and each optional improvement as SUGGESTION|<file>|<line>|<description>. \
Use the file names and line numbers exactly as shown. Output nothing else.";

#[async_trait]
impl AnalysisTool for LintTool {
    fn id(&self) -> ToolId {
        ToolId::Lint
    }

    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
        let collected = ctx.scanner(scan.paths()).collect_files()?;
        let files = &collected.contents;
        let settings = &ctx.config.lint;
        scan.checkpoint()?;

        let mut js = Vec::new();
        let mut py = Vec::new();
        for path in files.keys() {
            match Language::from_path(path) {
                Language::JavaScript => js.push(path.clone()),
                Language::Python => py.push(path.clone()),
                _ => {}
            }
        }

        let mut findings = skipped_findings(ToolId::Lint, &collected.skipped);

        findings.extend(
            lint_with(
                "eslint",
                &settings.eslint_command,
                &["--format", "json"],
                &js,
                parse_eslint,
                ctx,
                scan,
            )
            .await?,
        );
        scan.checkpoint()?;

        findings.extend(
            lint_with(
                "pylint",
                &settings.pylint_command,
                &["--output-format=json"],
                &py,
                parse_pylint,
                ctx,
                scan,
            )
            .await?,
        );
        info!("lint: {} linter finding(s)", findings.len());
        scan.checkpoint()?;

        let skip_review = scan.arg_bool("skip_review").unwrap_or(false) || !settings.model_review;
        if skip_review || files.is_empty() {
            return Ok(findings);
        }

        let prompt = review_prompt(files, settings.max_review_files, settings.max_review_chars);
        match scan.ask_model(ctx, REVIEW_SYSTEM_PROMPT, &prompt).await {
            Ok(response) => {
                let reviewed = parse_review(&response);
                debug!("lint: model review produced {} finding(s)", reviewed.len());
                findings.extend(reviewed);
            }
            Err(e) => warn!("lint review skipped: {}", e),
        }
        scan.checkpoint()?;

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanStatus;
    use crate::provider::scripted::Reply;
    use crate::tools::testing::context;
    use crate::tools::{ScanOptions, ToolHandle};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_eslint() {
        let root = Path::new("/work");
        let output = r#"[
            {"filePath": "/work/src/a.js", "messages": [
                {"ruleId": "no-unused-vars", "severity": 2, "message": "'x' is unused", "line": 3, "column": 7},
                {"ruleId": null, "severity": 1, "message": "Parsing hint", "line": 9}
            ]},
            {"filePath": "/work/src/clean.js", "messages": []}
        ]"#;

        let findings = parse_eslint(output, root).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[0].location.file, "src/a.js");
        assert_eq!(findings[0].location.start_line, 3);
        assert_eq!(findings[0].location.start_column, Some(7));
        assert_eq!(findings[0].metadata["rule"], "no-unused-vars");
        assert_eq!(findings[1].severity, Severity::Warning);
        assert_eq!(findings[1].metadata["rule"], "eslint");
    }

    #[test]
    fn test_parse_pylint() {
        let root = Path::new("/work");
        let output = r#"[
            {"type": "error", "path": "pkg/m.py", "line": 1, "column": 0, "symbol": "import-error", "message": "Unable to import 'x'", "message-id": "E0401"},
            {"type": "convention", "path": "pkg/m.py", "line": 5, "column": 0, "symbol": "missing-docstring", "message": "Missing docstring", "message-id": "C0111"},
            {"type": "warning", "path": "pkg/m.py", "line": 8, "column": 4, "message": "Unused variable", "message-id": "W0612"}
        ]"#;

        let findings = parse_pylint(output, root).unwrap();
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Info, Severity::Warning]);
        assert_eq!(findings[2].metadata["rule"], "W0612");
        assert_eq!(findings[0].location.file, "pkg/m.py");
    }

    #[test]
    fn test_malformed_linter_output() {
        assert!(parse_eslint("Oops, something went wrong", Path::new("/")).is_err());
        assert!(parse_pylint("", Path::new("/")).is_err());
    }

    #[test]
    fn test_parse_review_skips_malformed_lines() {
        let response = "Here is my review:\n\
            ISSUE|src/a.js|3|Possible null dereference\n\
            SUGGESTION|src/a.js|10|Extract a helper\n\
            ISSUE|src/a.js|three|Bad line number\n\
            ISSUE|src/a.js|4\n\
            NOTE|src/a.js|1|Unknown kind\n";

        let findings = parse_review(response);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].location.start_line, 3);
        assert_eq!(findings[1].severity, Severity::Hint);
        assert!(findings[1].title.contains("Extract a helper"));
    }

    #[test]
    fn test_review_prompt_is_capped() {
        let mut files = BTreeMap::new();
        for i in 0..8 {
            files.insert(format!("f{}.py", i), "x".repeat(10_000));
        }
        let prompt = review_prompt(&files, 5, 4000);
        assert_eq!(prompt.matches("=== ").count(), 5);
        assert!(!prompt.contains("=== f5.py"));
        assert!(prompt.len() < 5 * 4100 + 200);
    }

    #[tokio::test]
    async fn test_missing_linters_become_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "let x = 1;\n").unwrap();
        fs::write(dir.path().join("m.py"), "import os\n").unwrap();

        let (mut ctx, provider) = context(
            dir.path(),
            vec![Reply::text("ISSUE|a.js|1|x is never used")],
        );
        ctx.config.lint.eslint_command = "aidev-test-no-such-eslint".to_string();
        ctx.config.lint.pylint_command = "aidev-test-no-such-pylint".to_string();

        let handle = ToolHandle::new(Box::new(LintTool));
        let result = handle.execute(&ctx, &ScanOptions::new()).await;

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.findings.len(), 3);

        let failures: Vec<_> = result
            .findings
            .iter()
            .filter(|f| f.title.starts_with("Could not analyse"))
            .collect();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.severity == Severity::Warning));
        assert_eq!(failures[0].title, "Could not analyse 1 file(s) with eslint");
        assert!(failures[0].description.contains("aidev-test-no-such-eslint"));

        let review = result.findings.iter().find(|f| f.metadata["source"] == "model").unwrap();
        assert_eq!(review.location.file, "a.js");
        assert_eq!(provider.request_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_linter_with_only_stderr() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "let x = 1;\n").unwrap();

        let (mut ctx, _) = context(dir.path(), vec![]);
        ctx.config.lint.eslint_command = "false".to_string();
        ctx.config.lint.model_review = false;

        let handle = ToolHandle::new(Box::new(LintTool));
        let result = handle.execute(&ctx, &ScanOptions::new()).await;

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::Warning);
        assert!(result.findings[0].description.contains("false exited with"));
    }
}
