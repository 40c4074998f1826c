//! Analysis tools behind a uniform scan contract.
//!
//! Each tool implements [`AnalysisTool`]. A [`ToolHandle`] wraps one tool and
//! turns every run into a terminal [`ScanResult`]; a [`ToolRunner`] owns one
//! handle per registered tool and keeps the latest result of each.

pub mod comments;
pub mod commit;
pub mod dead_code;
pub mod export;
pub mod lint;
pub mod pr_review;

use crate::agent::messages::ToolResult;
use crate::config::Config;
use crate::models::{ExportFormat, Finding, Location, ScanResult, ScanStatus, Severity};
use crate::provider::{self, ModelProvider};
use crate::registry::ToolId;
use crate::scanner::{FileScanner, ScanConfig, SkippedFile};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Typed failures a tool can raise from `run`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Scan was cancelled")]
    Cancelled,

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}

/// Caller-supplied options for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Files or directories to limit the scan to. Empty means the whole workspace.
    pub paths: Vec<PathBuf>,
    pub cancel: CancellationToken,
    /// Tool-specific arguments, shaped by the tool's input schema.
    pub args: Map<String, Value>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from model-supplied arguments. `paths` is lifted out of
    /// the map; everything else stays available to the tool.
    pub fn from_args(args: &Value) -> Self {
        let args = args.as_object().cloned().unwrap_or_default();
        let paths = args
            .get("paths")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            paths,
            cancel: CancellationToken::new(),
            args,
        }
    }

    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// Shared services every tool may use.
pub struct ToolContext {
    pub workspace: PathBuf,
    pub config: Config,
    pub provider: Arc<dyn ModelProvider>,
}

impl ToolContext {
    pub fn new(workspace: PathBuf, config: Config, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            workspace,
            config,
            provider,
        }
    }

    /// Workspace scanner limited to the given paths.
    pub fn scanner(&self, paths: &[PathBuf]) -> FileScanner {
        FileScanner::new(
            self.workspace.clone(),
            ScanConfig::from(&self.config.scanner),
        )
        .with_scope(paths)
    }
}

/// Per-run view handed to [`AnalysisTool::run`].
pub struct ScanContext<'a> {
    options: &'a ScanOptions,
    cancel: CancellationToken,
}

impl<'a> ScanContext<'a> {
    /// `cancel` fires when either the caller or the owning handle cancels.
    pub fn new(options: &'a ScanOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.options.paths
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Phase boundary: stop here if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        Ok(())
    }

    pub fn arg_bool(&self, name: &str) -> Option<bool> {
        self.options.args.get(name).and_then(Value::as_bool)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.options.args.get(name).and_then(Value::as_str)
    }

    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        self.options.args.get(name).and_then(Value::as_i64)
    }

    pub fn arg_strings(&self, name: &str) -> Option<Vec<String>> {
        self.options.args.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
    }

    /// Single-prompt model pass racing this scan's cancellation.
    pub async fn ask_model(
        &self,
        ctx: &ToolContext,
        system: &str,
        prompt: &str,
    ) -> Result<String, provider::ProviderError> {
        provider::complete_text(ctx.provider.as_ref(), system, prompt, &self.cancel).await
    }
}

/// Warning finding for a file or phase that could not be analysed. The scan
/// carries on without it.
pub fn analysis_failure(
    tool: ToolId,
    subject: &str,
    location: Location,
    reason: impl Into<String>,
) -> Finding {
    Finding::new(
        tool,
        format!("{}:failure:{}", tool, subject),
        format!("Could not analyse {}", subject),
        location,
        Severity::Warning,
    )
    .with_description(reason)
    .with_metadata("failure", true)
}

/// One warning per file the scanner could not read.
pub fn skipped_findings(tool: ToolId, skipped: &[SkippedFile]) -> Vec<Finding> {
    skipped
        .iter()
        .map(|file| analysis_failure(tool, &file.path, Location::line(file.path.as_str(), 1), &file.reason))
        .collect()
}

/// One analysis tool.
#[async_trait]
pub trait AnalysisTool: Send + Sync {
    fn id(&self) -> ToolId;

    /// Produce findings. Return [`ToolError::Cancelled`] from a checkpoint to
    /// stop early; any other error fails the scan.
    async fn run(&self, ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>>;
}

/// Uniform execution wrapper around a tool.
pub struct ToolHandle {
    tool: Box<dyn AnalysisTool>,
    active: Mutex<CancellationToken>,
}

impl ToolHandle {
    pub fn new(tool: Box<dyn AnalysisTool>) -> Self {
        Self {
            tool,
            active: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> ToolId {
        self.tool.id()
    }

    fn active(&self) -> MutexGuard<'_, CancellationToken> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the tool to a terminal result. Failures and cancellation are
    /// reported through the result's status, never as an error.
    pub async fn execute(&self, ctx: &ToolContext, options: &ScanOptions) -> ScanResult {
        let id = self.id();
        let token = options.cancel.child_token();
        *self.active() = token.clone();

        let result = ScanResult::pending(id).running();
        let scan = ScanContext::new(options, token);

        if scan.is_cancelled() {
            return result.cancelled();
        }

        info!("Running {}", id);
        let result = match self.tool.run(ctx, &scan).await {
            Ok(findings) => {
                debug!("{} produced {} finding(s)", id, findings.len());
                result.completed(findings)
            }
            Err(e) if matches!(e.downcast_ref::<ToolError>(), Some(ToolError::Cancelled)) => {
                info!("{} cancelled", id);
                result.cancelled()
            }
            Err(e) => {
                warn!("{} failed: {:#}", id, e);
                result.failed(format!("{:#}", e))
            }
        };
        debug_assert!(result.status.is_terminal());
        result
    }

    /// Cancel the run in progress, if any.
    pub fn cancel(&self) {
        self.active().cancel();
    }

    pub fn export(&self, result: &ScanResult, format: ExportFormat) -> anyhow::Result<String> {
        export::export(result, format)
    }
}

/// The built-in tools, in registry order.
pub fn default_tools() -> Vec<Box<dyn AnalysisTool>> {
    vec![
        Box::new(dead_code::DeadCodeTool),
        Box::new(lint::LintTool),
        Box::new(comments::CommentsTool),
        Box::new(commit::CommitTool),
        Box::new(pr_review::PrReviewTool),
    ]
}

/// Host-side owner of the tool handles and their latest results.
pub struct ToolRunner {
    ctx: ToolContext,
    handles: HashMap<ToolId, ToolHandle>,
    results: Mutex<HashMap<ToolId, Arc<ScanResult>>>,
}

impl ToolRunner {
    /// Runner with every built-in tool.
    pub fn new(ctx: ToolContext) -> Self {
        Self::with_tools(ctx, default_tools())
    }

    pub fn with_tools(ctx: ToolContext, tools: Vec<Box<dyn AnalysisTool>>) -> Self {
        let handles = tools
            .into_iter()
            .map(|tool| (tool.id(), ToolHandle::new(tool)))
            .collect();
        Self {
            ctx,
            handles,
            results: Mutex::new(HashMap::new()),
        }
    }

    fn results(&self) -> MutexGuard<'_, HashMap<ToolId, Arc<ScanResult>>> {
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a tool and remember its result.
    pub async fn run(&self, id: ToolId, options: &ScanOptions) -> Arc<ScanResult> {
        let result = match self.handles.get(&id) {
            Some(handle) => handle.execute(&self.ctx, options).await,
            None => ScanResult::pending(id)
                .running()
                .failed(format!("Tool {} is not available", id)),
        };

        let result = Arc::new(result);
        self.results().insert(id, result.clone());
        result
    }

    /// Cancel the in-flight run of a tool.
    pub fn cancel(&self, id: ToolId) {
        if let Some(handle) = self.handles.get(&id) {
            handle.cancel();
        }
    }

    pub fn last_result(&self, id: ToolId) -> Option<Arc<ScanResult>> {
        self.results().get(&id).cloned()
    }

    /// Export the latest result of a tool, if it has run.
    pub fn export(&self, id: ToolId, format: ExportFormat) -> Option<anyhow::Result<String>> {
        let handle = self.handles.get(&id)?;
        self.last_result(id)
            .map(|result| handle.export(&result, format))
    }

    /// Run a tool on behalf of the agent and package the outcome as a tool result.
    pub async fn run_for_agent(
        &self,
        id: ToolId,
        call_id: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let options = ScanOptions::from_args(args).with_cancel(cancel.child_token());
        let result = self.run(id, &options).await;

        match result.status {
            ScanStatus::Completed => match export::export(&result, ExportFormat::Markdown) {
                Ok(content) => ToolResult::success(call_id, content),
                Err(e) => ToolResult::error(call_id, format!("Failed to render result: {:#}", e)),
            },
            _ => ToolResult::error(
                call_id,
                format!(
                    "{} {}: {}",
                    id,
                    result.status,
                    result.error.as_deref().unwrap_or("no details")
                ),
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the tool tests.

    use super::*;
    use crate::provider::scripted::{Reply, ScriptedProvider};
    use std::path::Path;

    pub fn context(workspace: &Path, replies: Vec<Reply>) -> (ToolContext, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(replies));
        let ctx = ToolContext::new(workspace.to_path_buf(), Config::default(), provider.clone());
        (ctx, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedTool(Vec<Finding>);

    #[async_trait]
    impl AnalysisTool for FixedTool {
        fn id(&self) -> ToolId {
            ToolId::Lint
        }

        async fn run(&self, _ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
            scan.checkpoint()?;
            Ok(self.0.clone())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl AnalysisTool for FailingTool {
        fn id(&self) -> ToolId {
            ToolId::DeadCode
        }

        async fn run(&self, _ctx: &ToolContext, _scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
            anyhow::bail!("disk on fire")
        }
    }

    /// Blocks until cancelled, then stops at a checkpoint.
    struct WaitingTool;

    #[async_trait]
    impl AnalysisTool for WaitingTool {
        fn id(&self) -> ToolId {
            ToolId::Comments
        }

        async fn run(&self, _ctx: &ToolContext, scan: &ScanContext<'_>) -> anyhow::Result<Vec<Finding>> {
            scan.cancel_token().cancelled().await;
            scan.checkpoint()?;
            Ok(Vec::new())
        }
    }

    fn finding() -> Finding {
        Finding::new(
            ToolId::Lint,
            "lint-1",
            "Unused variable",
            Location::line("a.js", 1),
            Severity::Warning,
        )
    }

    #[tokio::test]
    async fn test_execute_completes_with_summary() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let handle = ToolHandle::new(Box::new(FixedTool(vec![finding()])));

        let result = handle.execute(&ctx, &ScanOptions::new()).await;
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.summary.total, 1);
        assert_eq!(result.summary.warnings, 1);
        assert!(result.completed_at.unwrap() >= result.started_at);
    }

    #[tokio::test]
    async fn test_execute_maps_errors_to_failed() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let handle = ToolHandle::new(Box::new(FailingTool));

        let result = handle.execute(&ctx, &ScanOptions::new()).await;
        assert_eq!(result.status, ScanStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("disk on fire"));
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn test_precancelled_options_yield_cancelled() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let handle = ToolHandle::new(Box::new(FixedTool(vec![finding()])));

        let options = ScanOptions::new();
        options.cancel.cancel();
        let result = handle.execute(&ctx, &options).await;
        assert_eq!(result.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_handle_cancel_stops_running_scan() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let runner = Arc::new(ToolRunner::with_tools(ctx, vec![Box::new(WaitingTool)]));

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(ToolId::Comments, &ScanOptions::new()).await })
        };

        // The scan installs its token asynchronously; keep cancelling until it stops
        while runner.last_result(ToolId::Comments).is_none() {
            tokio::task::yield_now().await;
            runner.cancel(ToolId::Comments);
        }

        let result = task.await.unwrap();
        assert_eq!(result.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_runner_keeps_latest_result() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let runner = ToolRunner::with_tools(ctx, vec![Box::new(FixedTool(vec![finding()]))]);

        assert!(runner.last_result(ToolId::Lint).is_none());
        assert!(runner.export(ToolId::Lint, ExportFormat::Json).is_none());

        let result = runner.run(ToolId::Lint, &ScanOptions::new()).await;
        let stored = runner.last_result(ToolId::Lint).unwrap();
        assert!(Arc::ptr_eq(&result, &stored));
        assert_eq!(stored.findings, result.findings);

        let json = runner.export(ToolId::Lint, ExportFormat::Json).unwrap().unwrap();
        assert!(json.contains("Unused variable"));

        let missing = runner.run(ToolId::Tldr, &ScanOptions::new()).await;
        assert_eq!(missing.status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_for_agent_packages_result() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(dir.path(), vec![]);
        let runner = ToolRunner::with_tools(
            ctx,
            vec![Box::new(FixedTool(vec![finding()])), Box::new(FailingTool)],
        );
        let cancel = CancellationToken::new();

        let ok = runner
            .run_for_agent(ToolId::Lint, "c1", &json!({"paths": ["src"]}), &cancel)
            .await;
        assert_eq!(ok.call_id, "c1");
        assert!(!ok.is_error);
        assert!(ok.content.contains("Unused variable"));

        let failed = runner
            .run_for_agent(ToolId::DeadCode, "c2", &json!({}), &cancel)
            .await;
        assert!(failed.is_error);
        assert!(failed.content.contains("disk on fire"));
    }

    #[test]
    fn test_skipped_files_become_warnings() {
        let skipped = vec![SkippedFile {
            path: "src/b.ts".to_string(),
            reason: "permission denied".to_string(),
        }];
        let findings = skipped_findings(ToolId::DeadCode, &skipped);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].title, "Could not analyse src/b.ts");
        assert_eq!(findings[0].location.file, "src/b.ts");
        assert_eq!(findings[0].description, "permission denied");
        assert_eq!(findings[0].metadata["failure"], true);
    }

    #[test]
    fn test_options_from_args() {
        let options = ScanOptions::from_args(&json!({"paths": ["src", 3], "skip_review": true}));
        assert_eq!(options.paths, vec![PathBuf::from("src")]);

        let scan = ScanContext::new(&options, CancellationToken::new());
        assert_eq!(scan.arg_bool("skip_review"), Some(true));
        assert_eq!(scan.arg_str("branch"), None);
        assert!(scan.checkpoint().is_ok());

        assert!(ScanOptions::from_args(&Value::Null).paths.is_empty());
    }
}
