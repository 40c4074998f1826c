//! Ollama model provider.
//!
//! Talks to a local or remote Ollama server through its `/api/chat` and
//! `/api/tags` endpoints.

use super::{
    select_tier, ModelInfo, ModelProvider, ModelRequest, ModelResponse, ModelTier, OperatingMode,
    ProviderError, StopReason, TokenUsage,
};
use crate::agent::messages::{ChatMessage, ToolCall, ToolDefinition};
use crate::config::ModelConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Tool definition for Ollama's tool-calling API.
#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OllamaFunctionDefinition,
}

#[derive(Debug, Serialize)]
struct OllamaFunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Model names per tier.
#[derive(Debug, Clone)]
pub struct TierModels {
    pub high: String,
    pub mid: String,
    pub low: String,
}

impl TierModels {
    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::High => &self.high,
            ModelTier::Mid => &self.mid,
            ModelTier::Low => &self.low,
        }
    }
}

/// Provider backed by an Ollama server.
pub struct OllamaProvider {
    base_url: String,
    models: TierModels,
    mode: OperatingMode,
    temperature: f32,
    timeout_seconds: u64,
    http_client: reqwest::Client,
    call_counter: AtomicU64,
}

impl OllamaProvider {
    /// Create a provider from model settings.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            models: TierModels {
                high: config.high.clone(),
                mid: config.mid.clone(),
                low: config.low.clone(),
            },
            mode: config.mode,
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
            http_client,
            call_counter: AtomicU64::new(0),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout_seconds)
        } else if e.is_connect() {
            ProviderError::Connection(self.base_url.clone())
        } else {
            ProviderError::Request(e.to_string())
        }
    }

    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let model = self
            .models
            .model_for(select_tier(self.mode, request.role))
            .to_string();

        let body = OllamaChatRequest {
            model,
            messages: to_ollama_messages(&request.messages),
            tools: request.tools.iter().map(to_ollama_tool).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.temperature),
                num_predict: request.max_tokens,
            },
        };

        debug!(
            "Sending chat request to {} with {} messages and {} tools",
            body.model,
            body.messages.len(),
            body.tools.len()
        );

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(self.convert_response(chat_response))
    }

    fn next_call_id(&self) -> String {
        let n = self.call_counter.fetch_add(1, Ordering::Relaxed);
        format!("call_{}", n)
    }

    fn convert_response(&self, response: OllamaChatResponse) -> ModelResponse {
        let tool_calls: Vec<ToolCall> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id.unwrap_or_else(|| self.next_call_id()),
                name: call.function.name,
                arguments: parse_arguments(call.function.arguments),
            })
            .collect();

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else if response.done_reason.as_deref() == Some("length") {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (input, output) => Some(TokenUsage {
                input_tokens: input.unwrap_or(0),
                output_tokens: output.unwrap_or(0),
            }),
        };

        ModelResponse {
            content: response.message.content,
            model: response.model,
            usage,
            tool_calls,
            stop_reason,
        }
    }
}

/// Some models send arguments as a JSON-encoded string.
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

fn to_ollama_tool(definition: &ToolDefinition) -> OllamaTool {
    OllamaTool {
        tool_type: "function",
        function: OllamaFunctionDefinition {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition.input_schema.clone(),
        },
    }
}

fn to_ollama_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    // Ollama identifies tool results by tool name rather than call id.
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        let converted = match message {
            ChatMessage::System { content } => plain("system", content),
            ChatMessage::User { content } => plain("user", content),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                for call in tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                }
                OllamaMessage {
                    role: "assistant".to_string(),
                    content: content.clone(),
                    tool_calls: tool_calls
                        .iter()
                        .map(|call| OllamaToolCall {
                            id: Some(call.id.clone()),
                            function: OllamaFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect(),
                    tool_name: None,
                }
            }
            ChatMessage::ToolResult {
                call_id,
                content,
                is_error,
            } => OllamaMessage {
                role: "tool".to_string(),
                content: if *is_error {
                    format!("Error: {}", content)
                } else {
                    content.clone()
                },
                tool_calls: Vec::new(),
                tool_name: call_names.get(call_id.as_str()).map(|n| n.to_string()),
            },
        };
        out.push(converted);
    }

    out
}

fn plain(role: &str, content: &str) -> OllamaMessage {
    OllamaMessage {
        role: role.to_string(),
        content: content.to_string(),
        tool_calls: Vec::new(),
        tool_name: None,
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn send_request(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            response = self.chat(request) => response,
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelInfo {
                name: tag.name,
                size_bytes: tag.size,
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        self.list_models().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OllamaProvider {
        OllamaProvider::new(&ModelConfig::default()).unwrap()
    }

    #[test]
    fn test_tool_results_carry_tool_name() {
        let messages = vec![
            ChatMessage::user("scan"),
            ChatMessage::assistant(
                "",
                vec![ToolCall {
                    id: "c1".to_string(),
                    name: "lint".to_string(),
                    arguments: json!({}),
                }],
            ),
            ChatMessage::ToolResult {
                call_id: "c1".to_string(),
                content: "bad".to_string(),
                is_error: true,
            },
        ];

        let converted = to_ollama_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1].tool_calls.len(), 1);
        assert_eq!(converted[2].role, "tool");
        assert_eq!(converted[2].tool_name.as_deref(), Some("lint"));
        assert_eq!(converted[2].content, "Error: bad");
    }

    #[test]
    fn test_response_with_tool_calls() {
        let raw = json!({
            "model": "qwen2.5-coder:7b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "dead-code", "arguments": {"paths": ["src"]}}},
                    {"function": {"name": "lint", "arguments": "{\"skip_review\": true}"}}
                ]
            },
            "done": true,
            "prompt_eval_count": 120,
            "eval_count": 30
        });

        let response: OllamaChatResponse = serde_json::from_value(raw).unwrap();
        let response = provider().convert_response(response);

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_0");
        assert_eq!(response.tool_calls[1].id, "call_1");
        assert_eq!(response.tool_calls[1].arguments, json!({"skip_review": true}));
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input_tokens: 120,
                output_tokens: 30
            })
        );
    }

    #[test]
    fn test_response_without_usage() {
        let raw = json!({
            "model": "m",
            "message": {"role": "assistant", "content": "truncated"},
            "done_reason": "length"
        });

        let response: OllamaChatResponse = serde_json::from_value(raw).unwrap();
        let response = provider().convert_response(response);

        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert!(response.usage.is_none());
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = ModelRequest::new(super::super::RequestRole::Chat, vec![]);
        let err = provider().send_request(request, &cancel).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }
}
