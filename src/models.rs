//! Data models for analysis output.
//!
//! Every analysis tool reports [`Finding`]s, which are collected into an
//! immutable [`ScanResult`] once the tool reaches a terminal status.

use crate::registry::ToolId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Hint - optional cleanups the reader may ignore
    Hint,
    /// Info - observations worth knowing about
    Info,
    /// Warning - likely problems
    Warning,
    /// Error - definite problems
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Hint => write!(f, "Hint"),
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Hint => "💡",
            Severity::Info => "🔵",
            Severity::Warning => "🟡",
            Severity::Error => "🔴",
        }
    }

    /// The next lower severity. `Hint` is the floor.
    pub fn downgraded(self) -> Self {
        match self {
            Severity::Error => Severity::Warning,
            Severity::Warning => Severity::Info,
            Severity::Info | Severity::Hint => Severity::Hint,
        }
    }
}

/// Source location of a finding (1-based lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Path relative to the workspace root.
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<usize>,
}

impl Location {
    /// A location covering a line range without column information.
    pub fn lines(file: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            file: file.into(),
            start_line,
            end_line: end_line.max(start_line),
            start_column: None,
            end_column: None,
        }
    }

    /// A single-line location.
    pub fn line(file: impl Into<String>, line: usize) -> Self {
        Self::lines(file, line, line)
    }

    /// A location for findings about the workspace as a whole.
    pub fn workspace() -> Self {
        Self {
            file: String::new(),
            start_line: 0,
            end_line: 0,
            start_column: None,
            end_column: None,
        }
    }

    /// Returns the line range as a formatted string.
    pub fn line_range(&self) -> String {
        if self.end_line != self.start_line {
            format!("{}-{}", self.start_line, self.end_line)
        } else {
            self.start_line.to_string()
        }
    }
}

/// A replacement the user may apply. Tools never apply fixes themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub replacement: String,
    pub location: Location,
}

/// A single unit of analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier unique within one scan result.
    pub id: String,
    /// Tool that produced the finding.
    pub tool_id: ToolId,
    /// Short title.
    pub title: String,
    /// Detailed description.
    pub description: String,
    /// Where the finding applies.
    pub location: Location,
    pub severity: Severity,
    /// Optional suggested fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<SuggestedFix>,
    /// Free-form, tool-specific data.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Finding {
    pub fn new(
        tool_id: ToolId,
        id: impl Into<String>,
        title: impl Into<String>,
        location: Location,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            tool_id,
            title: title.into(),
            description: String::new(),
            location,
            severity,
            fix: None,
            metadata: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_fix(mut self, fix: SuggestedFix) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Lifecycle status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// Aggregate statistics over a list of findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Total number of findings.
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub hints: usize,
    /// Number of distinct files touched by findings.
    pub files_affected: usize,
}

impl ScanSummary {
    /// Creates a summary from a list of findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };

        let mut files = BTreeSet::new();
        for finding in findings {
            match finding.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
                Severity::Info => summary.infos += 1,
                Severity::Hint => summary.hints += 1,
            }
            // Workspace-level findings have no file
            if !finding.location.file.is_empty() {
                files.insert(finding.location.file.as_str());
            }
        }
        summary.files_affected = files.len();

        summary
    }

    /// Count for one severity.
    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Error => self.errors,
            Severity::Warning => self.warnings,
            Severity::Info => self.infos,
            Severity::Hint => self.hints,
        }
    }
}

/// Outcome of one tool execution.
///
/// Built through consuming transitions (`pending` -> `running` -> terminal), so
/// a terminal result has no way back to a mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub tool_id: ToolId,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub findings: Vec<Finding>,
    pub summary: ScanSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    /// A fresh result in `pending` state.
    pub fn pending(tool_id: ToolId) -> Self {
        Self {
            tool_id,
            status: ScanStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            findings: Vec::new(),
            summary: ScanSummary::default(),
            error: None,
        }
    }

    /// Transition to `running`, stamping the start time.
    pub fn running(self) -> Self {
        Self {
            status: ScanStatus::Running,
            started_at: Utc::now(),
            ..self
        }
    }

    /// Terminal: completed with findings.
    pub fn completed(self, findings: Vec<Finding>) -> Self {
        let summary = ScanSummary::from_findings(&findings);
        Self {
            status: ScanStatus::Completed,
            completed_at: Some(Utc::now()),
            findings,
            summary,
            ..self
        }
    }

    /// Terminal: the run itself failed.
    pub fn failed(self, message: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Failed,
            completed_at: Some(Utc::now()),
            error: Some(message.into()),
            ..self
        }
    }

    /// Terminal: cancelled at a phase boundary.
    pub fn cancelled(self) -> Self {
        Self {
            status: ScanStatus::Cancelled,
            completed_at: Some(Utc::now()),
            error: Some("Scan was cancelled".to_string()),
            ..self
        }
    }

    /// Wall-clock duration in seconds, if finished.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Export format for scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
}
