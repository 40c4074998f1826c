//! Model provider abstraction.
//!
//! The agent loop and the analysis tools only talk to a language model
//! through [`ModelProvider`]. Implementations own the transport.

pub mod ollama;

pub use ollama::OllamaProvider;

use crate::agent::messages::{ChatMessage, ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by a model provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Cannot connect to model provider at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Model provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Request failed: {0}")]
    Request(String),
}

/// What a request is for. Providers use it to pick a model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestRole {
    Chat,
    Tool,
}

/// Capability/cost class of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    High,
    Mid,
    Low,
}

/// Operating mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Economy,
    #[default]
    Balanced,
    Performance,
}

/// Pick the model tier for a request.
pub fn select_tier(mode: OperatingMode, role: RequestRole) -> ModelTier {
    match (mode, role) {
        (OperatingMode::Performance, RequestRole::Chat) => ModelTier::High,
        (OperatingMode::Performance, RequestRole::Tool) => ModelTier::Mid,
        (OperatingMode::Balanced, RequestRole::Chat) => ModelTier::Mid,
        (OperatingMode::Balanced, RequestRole::Tool) => ModelTier::Low,
        (OperatingMode::Economy, _) => ModelTier::Low,
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token usage reported for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A request to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub role: RequestRole,
    pub messages: Vec<ChatMessage>,
    /// Empty when the request offers no tools.
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(role: RequestRole, messages: Vec<ChatMessage>) -> Self {
        Self {
            role,
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A response from the model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Generated text; may be empty when stopping for tool use.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    /// Missing when the provider does not report usage.
    pub usage: Option<TokenUsage>,
    /// Empty when the model produced a final answer.
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

/// Information about a model offered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Language model capability interface.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a request. Must reject with [`ProviderError::Cancelled`] once
    /// `cancel` fires.
    async fn send_request(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError>;

    /// Models this provider can serve.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    /// Whether the provider is reachable.
    async fn is_available(&self) -> bool;
}

/// Send a single user prompt with an optional system prompt and return the text.
///
/// Used by the analysis tools for their model passes.
pub async fn complete_text(
    provider: &dyn ModelProvider,
    system: &str,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<String, ProviderError> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let response = provider
        .send_request(ModelRequest::new(RequestRole::Tool, messages), cancel)
        .await?;
    Ok(response.content)
}
