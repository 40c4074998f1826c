//! Agent loop for tool-calling conversations.
//!
//! [`AgentRun`] drives a bounded exchange between one user request and a
//! [`ModelProvider`]. It never executes tools: it yields an [`AgentAction`]
//! for each tool the model asks for and waits for the host to resume it with
//! the result. The run suspends at exactly one point at a time.

use crate::agent::messages::{ChatMessage, ToolCall, ToolDefinition, ToolResult};
use crate::config::AgentSettings;
use crate::provider::{ModelProvider, ModelRequest, RequestRole};
use crate::registry::{self, ToolId, ToolRegistryEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tokens kept in reserve below the budget before another request is refused.
pub const TOKEN_SAFETY_MARGIN: u64 = 100;

/// Errors constructing an agent run.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AgentError {
    #[error("max_turns must be greater than zero")]
    ZeroTurns,

    #[error("max_token_budget must be greater than zero")]
    ZeroBudget,
}

/// Immutable per-run configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    max_turns: usize,
    max_token_budget: u64,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
}

impl AgentConfig {
    /// Create a configuration exposing every registered tool.
    pub fn new(max_turns: usize, max_token_budget: u64) -> Result<Self, AgentError> {
        if max_turns == 0 {
            return Err(AgentError::ZeroTurns);
        }
        if max_token_budget == 0 {
            return Err(AgentError::ZeroBudget);
        }

        Ok(Self {
            max_turns,
            max_token_budget,
            system_prompt: String::new(),
            tools: registry::tool_definitions(),
        })
    }

    /// Build from the `[agent]` configuration section.
    pub fn from_settings(settings: &AgentSettings) -> Result<Self, AgentError> {
        Ok(Self::new(settings.max_turns, settings.max_token_budget)?
            .with_system_prompt(settings.system_prompt.clone()))
    }

    /// Override the built-in system prompt. Empty keeps the default.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Restrict the tools exposed to the model.
    #[cfg(test)]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn max_token_budget(&self) -> u64 {
        self.max_token_budget
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn offers(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Cumulative token usage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

impl AgentUsage {
    pub fn total(&self) -> u64 {
        self.total_input_tokens.saturating_add(self.total_output_tokens)
    }
}

/// What the run asks the host to do next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    /// Execute an autonomous tool and resume with its result.
    ToolCall {
        tool_id: ToolId,
        call_id: String,
        args: Value,
    },
    /// Ask the user first; resume with the result, or with nothing if denied.
    ConfirmationRequired {
        tool_id: ToolId,
        call_id: String,
        args: Value,
        description: String,
    },
    /// Final answer. Terminal.
    Response { content: String, usage: AgentUsage },
    /// Run-fatal failure. Terminal.
    Error { message: String },
}

enum RunState {
    /// Next step is a budget check and a model request.
    Ready,
    /// Suspended on a host-facing action for `call`.
    AwaitingResult {
        call: ToolCall,
        queue: VecDeque<ToolCall>,
    },
    Finished,
}

/// One agent run.
///
/// Drive it with [`AgentRun::start`], then call [`AgentRun::resume`] after
/// every tool-related action until a terminal action comes back.
pub struct AgentRun {
    provider: Arc<dyn ModelProvider>,
    config: AgentConfig,
    messages: Vec<ChatMessage>,
    turns_remaining: usize,
    usage: AgentUsage,
    state: RunState,
    cancel: CancellationToken,
}

impl AgentRun {
    /// Prepare a run: system prompt, replayed history, then the new user message.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        config: AgentConfig,
        history: Vec<ChatMessage>,
        user_message: impl Into<String>,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(build_system_prompt(&config)));
        messages.extend(history);
        messages.push(ChatMessage::user(user_message));

        Self {
            turns_remaining: config.max_turns,
            provider,
            config,
            messages,
            usage: AgentUsage::default(),
            state: RunState::Ready,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[cfg(test)]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the in-flight model request when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Message sequence so far, system prompt first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn usage(&self) -> AgentUsage {
        self.usage
    }

    #[cfg(test)]
    pub fn turns_remaining(&self) -> usize {
        self.turns_remaining
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Finished)
    }

    /// Conversation history without the system prompt, for replay in a later run.
    pub fn into_history(self) -> Vec<ChatMessage> {
        self.messages
            .into_iter()
            .skip_while(|m| matches!(m, ChatMessage::System { .. }))
            .collect()
    }

    /// Begin the run.
    pub async fn start(&mut self) -> Option<AgentAction> {
        self.next(None).await
    }

    /// Answer the pending tool action. `None` means skipped or denied.
    pub async fn resume(&mut self, result: Option<ToolResult>) -> Option<AgentAction> {
        self.next(result).await
    }

    /// Advance the run. Returns `None` once a terminal action has been yielded.
    pub async fn next(&mut self, input: Option<ToolResult>) -> Option<AgentAction> {
        match std::mem::replace(&mut self.state, RunState::Finished) {
            RunState::Finished => None,
            RunState::Ready => {
                if input.is_some() {
                    warn!("Ignoring tool result supplied before any tool call was requested");
                }
                Some(self.drive().await)
            }
            RunState::AwaitingResult { call, queue } => {
                self.record_result(&call, input);
                if let Some(action) = self.dispatch(queue) {
                    return Some(action);
                }
                self.end_turn();
                Some(self.drive().await)
            }
        }
    }

    /// Budget check, model request, and dispatch, until something needs the host.
    async fn drive(&mut self) -> AgentAction {
        loop {
            if self.turns_remaining == 0 {
                warn!("Agent hit the turn limit of {}", self.config.max_turns);
                return self.fail(format!(
                    "Reached the limit of {} turns without a final answer. Stopping to prevent runaway execution.",
                    self.config.max_turns
                ));
            }

            let used = self.usage.total();
            let limit = self
                .config
                .max_token_budget
                .saturating_sub(TOKEN_SAFETY_MARGIN);
            if used >= limit {
                warn!("Agent token budget exhausted: {} of {}", used, self.config.max_token_budget);
                return self.fail(format!(
                    "Token budget exhausted: used {} of {} tokens.",
                    used, self.config.max_token_budget
                ));
            }

            if self.cancel.is_cancelled() {
                return self.fail("Agent run was cancelled.".to_string());
            }

            let request = ModelRequest::new(RequestRole::Chat, self.messages.clone())
                .with_tools(self.config.tools.clone());

            debug!(
                "Agent request with {} messages, {} turns remaining",
                self.messages.len(),
                self.turns_remaining
            );

            let response = match self.provider.send_request(request, &self.cancel).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Model request failed: {}", e);
                    return self.fail(format!("Model request failed: {}", e));
                }
            };

            debug!("{} stopped: {:?}", response.model, response.stop_reason);
            if let Some(usage) = response.usage {
                self.usage.total_input_tokens =
                    self.usage.total_input_tokens.saturating_add(usage.input_tokens);
                self.usage.total_output_tokens =
                    self.usage.total_output_tokens.saturating_add(usage.output_tokens);
            }

            if response.tool_calls.is_empty() {
                info!("Agent finished with a final answer");
                self.messages
                    .push(ChatMessage::assistant(response.content.clone(), Vec::new()));
                self.state = RunState::Finished;
                return AgentAction::Response {
                    content: response.content,
                    usage: self.usage,
                };
            }

            info!("Model requested {} tool call(s)", response.tool_calls.len());
            self.messages.push(ChatMessage::assistant(
                response.content,
                response.tool_calls.clone(),
            ));

            if let Some(action) = self.dispatch(response.tool_calls.into()) {
                return action;
            }
            self.end_turn();
        }
    }

    /// Walk the queued calls in order. Calls the host cannot act on get a
    /// synthesized result; the first host-facing call suspends the run.
    fn dispatch(&mut self, mut queue: VecDeque<ToolCall>) -> Option<AgentAction> {
        while let Some(mut call) = queue.pop_front() {
            let entry = match registry::get_tool_by_command(&call.name) {
                Some(entry) if self.config.offers(&call.name) => entry,
                _ => {
                    warn!("Model requested unknown tool: {}", call.name);
                    let message = format!(
                        "Unknown tool: {}. Available tools: {}",
                        call.name,
                        self.config.tool_names().join(", ")
                    );
                    self.messages.push(ToolResult::error(&call.id, message).into());
                    continue;
                }
            };

            if call.arguments.is_null() {
                call.arguments = Value::Object(Default::default());
            }

            if let Err(reason) = registry::validate_args(entry, &call.arguments) {
                warn!("Rejected arguments for {}: {}", call.name, reason);
                let message = format!(
                    "Invalid arguments for tool {}: {}. Expected schema: {}",
                    call.name,
                    reason,
                    entry.input_schema()
                );
                self.messages.push(ToolResult::error(&call.id, message).into());
                continue;
            }

            let action = if entry.is_autonomous() {
                AgentAction::ToolCall {
                    tool_id: entry.id,
                    call_id: call.id.clone(),
                    args: call.arguments.clone(),
                }
            } else {
                AgentAction::ConfirmationRequired {
                    tool_id: entry.id,
                    call_id: call.id.clone(),
                    args: call.arguments.clone(),
                    description: describe_call(entry, &call.arguments),
                }
            };

            self.state = RunState::AwaitingResult { call, queue };
            return Some(action);
        }

        None
    }

    fn record_result(&mut self, call: &ToolCall, input: Option<ToolResult>) {
        match input {
            Some(mut result) => {
                if result.call_id != call.id {
                    warn!(
                        "Tool result id {} does not match pending call {}; correcting",
                        result.call_id, call.id
                    );
                    result.call_id = call.id.clone();
                }
                self.messages.push(result.into());
            }
            None => {
                debug!("Tool call {} skipped or denied", call.id);
                self.messages.push(
                    ToolResult::error(
                        &call.id,
                        format!("Tool call '{}' was skipped or denied by the user.", call.name),
                    )
                    .into(),
                );
            }
        }
    }

    fn end_turn(&mut self) {
        self.turns_remaining = self.turns_remaining.saturating_sub(1);
    }

    fn fail(&mut self, message: String) -> AgentAction {
        self.state = RunState::Finished;
        AgentAction::Error { message }
    }
}

/// Human-readable text for an approval prompt.
fn describe_call(entry: &ToolRegistryEntry, args: &Value) -> String {
    let has_args = args.as_object().is_some_and(|map| !map.is_empty());
    if has_args {
        format!("{}: {} (arguments: {})", entry.display_name, entry.description, args)
    } else {
        format!("{}: {}", entry.display_name, entry.description)
    }
}

/// The system prompt for a run: the custom prompt if set, else the built-in one.
pub fn build_system_prompt(config: &AgentConfig) -> String {
    if !config.system_prompt.trim().is_empty() {
        return config.system_prompt.clone();
    }

    let mut prompt = String::from(AGENT_PERSONA);
    prompt.push_str("\n\n## Available Tools\n\n");

    if config.tools.is_empty() {
        prompt.push_str("No tools are available in this session.\n");
    }

    for tool in &config.tools {
        let gated = registry::get_tool_by_command(&tool.name)
            .map(|entry| !entry.is_autonomous())
            .unwrap_or(false);
        prompt.push_str(&format!("- `{}` - {}", tool.name, tool.description));
        if gated {
            prompt.push_str(" (requires user confirmation)");
        }
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(SAFETY_CONSTRAINTS);
    prompt
}

const AGENT_PERSONA: &str = r#"You are AIDev, a careful software engineering assistant working inside the user's workspace.
You answer questions about the code and use the analysis tools below when they help. Prefer one well-chosen tool call over many speculative ones, and summarize tool output for the user instead of repeating it verbatim."#;

const SAFETY_CONSTRAINTS: &str = r#"## Constraints

- Never claim to have changed files; tools only report findings and proposals.
- Tools that modify repository state require the user's approval. If a call is denied, do not retry it; explain what it would have done.
- If a tool reports an error, explain it or try a different approach. Do not invent results.
- Stop calling tools once you can answer."#;
