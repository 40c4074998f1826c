//! Dead code finder.
//!
//! Flags exported symbols whose name appears nowhere in the workspace except
//! at their own definition. An optional model pass may mark findings as
//! likely false positives; those are downgraded, never dropped.

use super::{skipped_findings, AnalysisTool, ScanContext, ToolContext};
use crate::models::{Finding, Location, Severity};
use crate::registry::ToolId;
use crate::scanner::{Language, SkippedFile};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub struct DeadCodeTool;

/// An exported symbol found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub line: usize,
}

static JS_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*export[ \t]+(?:declare[ \t]+)?(?:abstract[ \t]+)?(?:async[ \t]+)?(?P<kind>function\*?|class|const|let|var|interface|type|enum)[ \t]+(?P<name>[A-Za-z_$][\w$]*)",
    )
    .unwrap()
});

static RUST_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*pub(?:\([^)]*\))?[ \t]+(?:const[ \t]+)?(?:async[ \t]+)?(?:unsafe[ \t]+)?(?P<kind>fn|struct|enum|trait|const|static|type|mod)[ \t]+(?P<name>[A-Za-z_]\w*)",
    )
    .unwrap()
});

// Top level only; a leading underscore marks a private name
static PYTHON_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:async[ \t]+)?(?P<kind>def|class)[ \t]+(?P<name>[A-Za-z]\w*)").unwrap()
});

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*").unwrap());

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// Exported symbols declared in one file.
pub fn extract_exports(file: &str, content: &str) -> Vec<ExportedSymbol> {
    let pattern = match Language::from_path(file) {
        Language::JavaScript => &*JS_EXPORT_RE,
        Language::Rust => &*RUST_EXPORT_RE,
        Language::Python => &*PYTHON_EXPORT_RE,
        Language::CLike | Language::Other => return Vec::new(),
    };

    pattern
        .captures_iter(content)
        .filter_map(|caps| {
            let name = caps.name("name")?;
            let kind = caps.name("kind")?;
            if name.as_str() == "main" {
                return None;
            }
            Some(ExportedSymbol {
                name: name.as_str().to_string(),
                kind: kind.as_str().trim_end_matches('*').to_string(),
                file: file.to_string(),
                line: line_of(content, name.start()),
            })
        })
        .collect()
}

/// Identifier occurrence counts across all files.
pub fn count_identifiers<'a>(files: impl IntoIterator<Item = &'a String>) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for content in files {
        for m in IDENTIFIER_RE.find_iter(content) {
            *counts.entry(m.as_str()).or_insert(0) += 1;
        }
    }
    counts
}

/// Symbols referenced nowhere but their own definition.
pub fn find_unused(
    scoped: &BTreeMap<String, String>,
    corpus: &BTreeMap<String, String>,
) -> Vec<ExportedSymbol> {
    let counts = count_identifiers(corpus.values());
    scoped
        .iter()
        .flat_map(|(file, content)| extract_exports(file, content))
        .filter(|symbol| counts.get(symbol.name.as_str()).copied().unwrap_or(0) <= 1)
        .collect()
}

fn to_finding(symbol: &ExportedSymbol) -> Finding {
    Finding::new(
        ToolId::DeadCode,
        format!("dead-code:{}:{}:{}", symbol.file, symbol.line, symbol.name),
        format!("Unused export `{}`", symbol.name),
        Location::line(&symbol.file, symbol.line),
        Severity::Warning,
    )
    .with_description(format!(
        "`{}` ({}) is exported from {} but never referenced elsewhere in the workspace.",
        symbol.name, symbol.kind, symbol.file
    ))
    .with_metadata("symbol", symbol.name.as_str())
    .with_metadata("kind", symbol.kind.as_str())
}

/// `FALSE_POSITIVE|<id>|<reason>` lines from the model. Anything else is ignored.
pub fn parse_false_positives(response: &str) -> Vec<(String, String)> {
    response
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(3, '|');
            if parts.next()?.trim() != "FALSE_POSITIVE" {
                return None;
            }
            let id = parts.next()?.trim();
            let reason = parts.next().map(str::trim).unwrap_or_default();
            if id.is_empty() {
                return None;
            }
            Some((id.to_string(), reason.to_string()))
        })
        .collect()
}

/// Downgrade findings the model marked as false positives.
pub fn apply_false_positives(findings: &mut [Finding], verdicts: &[(String, String)]) -> usize {
    let mut applied = 0;
    for (id, reason) in verdicts {
        if let Some(finding) = findings.iter_mut().find(|f| &f.id == id) {
            finding.severity = finding.severity.downgraded();
            if !reason.is_empty() {
                finding
                    .description
                    .push_str(&format!("\n\nPossibly a false positive: {}", reason));
            }
            finding.metadata.insert("false_positive".to_string(), true.into());
            applied += 1;
        }
    }
    applied
}

fn review_prompt(findings: &[Finding]) -> String {
    let mut prompt = String::from(
        "These exported symbols look unused because their names appear only once in the workspace.\n\
         Some may be used dynamically, by external packages, by frameworks, or as public API.\n\n",
    );
    for finding in findings {
        prompt.push_str(&format!(
            "{} | {}:{} | {}\n",
            finding.id,
            finding.location.file,
            finding.location.start_line,
            finding.title
        ));
    }
    prompt
}

const REVIEW_SYSTEM_PROMPT: &str = "You review dead code reports. For each entry that is probably NOT dead code, \
answer with one line in the form FALSE_POSITIVE|<id>|<short reason>. Output nothing else. \
If every entry looks genuinely unused, output nothing.";

#[async_trait]
impl AnalysisTool for DeadCodeTool {
    fn id(&self) -> ToolId {
        ToolId::DeadCode
    }

    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
        let corpus = ctx
            .scanner(&[])
            .collect_files()
            .context("Failed to read workspace files")?;
        let scoped = if scan.paths().is_empty() {
            corpus.clone()
        } else {
            ctx.scanner(scan.paths()).collect_files()?
        };
        debug!(
            "dead-code: {} scoped file(s), {} in corpus",
            scoped.contents.len(),
            corpus.contents.len()
        );
        scan.checkpoint()?;

        // Unreadable corpus files hide references, so they are reported even outside the scope
        let mut unreadable: BTreeMap<&str, &SkippedFile> = BTreeMap::new();
        for file in corpus.skipped.iter().chain(&scoped.skipped) {
            unreadable.entry(file.path.as_str()).or_insert(file);
        }
        let unreadable: Vec<SkippedFile> = unreadable.into_values().cloned().collect();

        let mut findings: Vec<Finding> = find_unused(&scoped.contents, &corpus.contents)
            .iter()
            .map(to_finding)
            .collect();
        info!("dead-code: {} candidate(s)", findings.len());
        scan.checkpoint()?;

        if !findings.is_empty() && !scan.arg_bool("skip_review").unwrap_or(false) {
            match scan
                .ask_model(ctx, REVIEW_SYSTEM_PROMPT, &review_prompt(&findings))
                .await
            {
                Ok(response) => {
                    let verdicts = parse_false_positives(&response);
                    let applied = apply_false_positives(&mut findings, &verdicts);
                    debug!("dead-code: model flagged {} false positive(s)", applied);
                }
                Err(e) => warn!("dead-code review skipped: {}", e),
            }
            scan.checkpoint()?;
        }

        findings.extend(skipped_findings(ToolId::DeadCode, &unreadable));
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::Reply;
    use crate::tools::testing::context;
    use crate::tools::{ScanOptions, ToolHandle};
    use crate::models::ScanStatus;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_exports_per_language() {
        let ts = "export function used() {}\nexport default function main() {}\n  export const unused = 1;\nexport async function load() {}\n";
        let names: Vec<_> = extract_exports("a.ts", ts).into_iter().map(|s| (s.name, s.line)).collect();
        assert_eq!(
            names,
            vec![("used".to_string(), 1), ("unused".to_string(), 3), ("load".to_string(), 4)]
        );

        let rs = "pub fn api() {}\nfn private() {}\npub(crate) struct Thing;\npub async fn go() {}\n";
        let names: Vec<_> = extract_exports("lib.rs", rs).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["api", "Thing", "go"]);

        let py = "def public():\n    pass\ndef _private():\n    pass\nclass Model:\n    def method(self): pass\n";
        let names: Vec<_> = extract_exports("m.py", py).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["public", "Model"]);

        assert!(extract_exports("notes.md", "export const x = 1").is_empty());
    }

    #[test]
    fn test_find_unused_counts_whole_corpus() {
        let mut corpus = BTreeMap::new();
        corpus.insert(
            "a.ts".to_string(),
            "export function helper() {}\nexport function orphan() {}\n".to_string(),
        );
        corpus.insert("b.ts".to_string(), "import { helper } from './a';\nhelper();\n".to_string());

        let unused = find_unused(&corpus, &corpus);
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].name, "orphan");
        assert_eq!(unused[0].line, 2);
    }

    #[test]
    fn test_parse_false_positives_ignores_noise() {
        let response = "Sure!\nFALSE_POSITIVE|dead-code:a.ts:2:orphan|used by the router\nFALSE_POSITIVE||missing id\nNOT_A_VERDICT|x|y\n  FALSE_POSITIVE | id2 | spaced  \n";
        let parsed = parse_false_positives(response);
        assert_eq!(
            parsed,
            vec![
                ("dead-code:a.ts:2:orphan".to_string(), "used by the router".to_string()),
                ("id2".to_string(), "spaced".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_model_pass_downgrades_instead_of_removing() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.ts"),
            "export function orphan() {}\nexport function lonely() {}\n",
        )
        .unwrap();

        let (ctx, provider) = context(
            dir.path(),
            vec![Reply::text("FALSE_POSITIVE|dead-code:a.ts:1:orphan|loaded dynamically")],
        );
        let handle = ToolHandle::new(Box::new(DeadCodeTool));
        let result = handle.execute(&ctx, &ScanOptions::new()).await;

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.findings.len(), 2);
        assert_eq!(result.findings[0].severity, Severity::Info);
        assert!(result.findings[0].description.contains("loaded dynamically"));
        assert_eq!(result.findings[1].severity, Severity::Warning);
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_references_in_latin1_files_count() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "export function helper() {}\n").unwrap();
        fs::write(
            dir.path().join("b.ts"),
            b"// r\xe9sum\xe9 export\nimport { helper } from './a';\nhelper();\n",
        )
        .unwrap();

        let (ctx, provider) = context(dir.path(), vec![]);
        let handle = ToolHandle::new(Box::new(DeadCodeTool));
        let result = handle.execute(&ctx, &ScanOptions::new()).await;

        assert_eq!(result.status, ScanStatus::Completed);
        assert!(result.findings.is_empty());
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_skip_review_and_model_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "export const orphan = 1;\n").unwrap();

        let (ctx, provider) = context(dir.path(), vec![]);
        let handle = ToolHandle::new(Box::new(DeadCodeTool));

        let skipped = handle
            .execute(&ctx, &ScanOptions::new().with_arg("skip_review", true))
            .await;
        assert_eq!(skipped.findings.len(), 1);
        assert_eq!(provider.request_count(), 0);

        // Exhausted script makes the model pass fail; findings survive untouched
        let reviewed = handle.execute(&ctx, &ScanOptions::new()).await;
        assert_eq!(reviewed.status, ScanStatus::Completed);
        assert_eq!(reviewed.findings[0].severity, Severity::Warning);
    }
}
