use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use shannon_config::LlmConfig;
use shannon_core::{Result, ShannonError, ToolCall};

use crate::provider::*;

const MAX_RETRIES: u32 = 3;

/// Anthropic Messages API provider with native tool use.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        if api_key.is_empty() {
            return Err(ShannonError::Config(
                "anthropic provider requires llm.api_key or ANTHROPIC_API_KEY".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ShannonError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg.role {
                // Handled via the top-level "system" field.
                Role::System => continue,
                Role::User => {
                    let has_results = msg
                        .content
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
                    if has_results {
                        let blocks: Vec<serde_json::Value> = msg
                            .content
                            .iter()
                            .filter_map(|b| match b {
                                ContentBlock::Text { text } => Some(serde_json::json!({
                                    "type": "text",
                                    "text": text,
                                })),
                                ContentBlock::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => Some(serde_json::json!({
                                    "type": "tool_result",
                                    "tool_use_id": tool_use_id,
                                    "content": content,
                                    "is_error": is_error,
                                })),
                                ContentBlock::ToolUse { .. } => None,
                            })
                            .collect();
                        messages.push(serde_json::json!({
                            "role": "user",
                            "content": blocks,
                        }));
                    } else {
                        messages.push(serde_json::json!({
                            "role": "user",
                            "content": msg.text_content(),
                        }));
                    }
                }
                Role::Assistant => {
                    let has_tool_use = msg
                        .content
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
                    if has_tool_use {
                        let mut blocks: Vec<serde_json::Value> = Vec::new();
                        for block in &msg.content {
                            match block {
                                ContentBlock::Text { text } if !text.is_empty() => {
                                    blocks.push(serde_json::json!({
                                        "type": "text",
                                        "text": text,
                                    }));
                                }
                                ContentBlock::ToolUse { id, name, input } => {
                                    blocks.push(serde_json::json!({
                                        "type": "tool_use",
                                        "id": id,
                                        "name": name,
                                        "input": input,
                                    }));
                                }
                                _ => {}
                            }
                        }
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": blocks,
                        }));
                    } else {
                        messages.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.text_content(),
                        }));
                    }
                }
            }
        }

        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });

        if let Some(ref system) = request.system {
            body["system"] = serde_json::json!(system);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        body
    }

    async fn post_with_retry(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/messages", self.base_url);
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            let resp = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(ShannonError::Timeout {
                        seconds: self.timeout_secs,
                    });
                }
                Err(e) => return Err(ShannonError::Provider(e.to_string())),
            };

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json()
                    .await
                    .map_err(|e| ShannonError::Provider(e.to_string()));
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt >= MAX_RETRIES {
                let text = resp.text().await.unwrap_or_default();
                return Err(ShannonError::Provider(format!("HTTP {status}: {text}")));
            }

            let wait = Duration::from_secs(1 << attempt);
            warn!(status = %status, attempt, wait_secs = wait.as_secs(), "anthropic request failed, retrying");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    fn parse_response(data: serde_json::Value) -> LlmResponse {
        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b["type"] == "text").then(|| b["text"].as_str().unwrap_or("").to_string())
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let tool_calls: Vec<ToolCall> = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b["type"] == "tool_use").then(|| ToolCall {
                            id: b["id"].as_str().unwrap_or("").to_string(),
                            name: b["name"].as_str().unwrap_or("").to_string(),
                            arguments: b["input"].clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stop_reason = match data["stop_reason"].as_str() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        LlmResponse {
            content,
            tool_calls,
            stop_reason,
            input_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request);
        debug!(model = %self.model, tools = request.tools.len(), "sending anthropic request");
        let data = self.post_with_retry(&body).await?;
        Ok(Self::parse_response(data))
    }
}
