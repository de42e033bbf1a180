//! OpenAI-compatible local provider (ollama, llama.cpp, vllm, ...).
//!
//! Uses native `tool_calls` when the backend emits them; otherwise falls
//! back to the ReAct protocol: tools are serialized into the system prompt
//! with Thought/Action/Action Input instructions and parsed back out of the
//! generated text. A turn without a valid Action line ends the cycle.

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use shannon_config::LlmConfig;
use shannon_core::{Result, ShannonError, ToolCall, ToolSchema};

use crate::provider::*;

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action:\s*(\w+)\s*\nAction Input:\s*(\{.*?\})").expect("valid regex")
});

/// Serialize tools into a ReAct-style system prompt.
fn build_react_system(system: Option<&str>, tools: &[ToolSchema]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(system) = system {
        parts.push(system.to_string());
    }
    if !tools.is_empty() {
        parts.push(
            "\n## Tools\nYou have the following tools. To use one, respond with:\n".to_string(),
        );
        parts.push(
            "Thought: <your reasoning>\nAction: <tool_name>\nAction Input: <json arguments>\n"
                .to_string(),
        );
        parts.push(
            "When you have a final answer, respond normally without Action/Action Input.\n"
                .to_string(),
        );
        for tool in tools {
            let schema = serde_json::to_string_pretty(&tool.input_schema).unwrap_or_default();
            parts.push(format!(
                "### {}\n{}\nParameters: {}\n",
                tool.name, tool.description, schema
            ));
        }
    }
    parts.join("\n")
}

/// Parse ReAct-formatted text into (content, tool calls).
fn parse_react_response(text: &str) -> (String, Vec<ToolCall>) {
    let Some(caps) = ACTION_RE.captures(text) else {
        return (text.to_string(), vec![]);
    };
    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let args = caps
        .get(2)
        .and_then(|m| serde_json::from_str(m.as_str()).ok())
        .unwrap_or_else(|| serde_json::json!({}));
    let content = text[..caps.get(0).map(|m| m.start()).unwrap_or(0)]
        .trim()
        .to_string();
    let call = ToolCall {
        id: Uuid::new_v4().simple().to_string()[..12].to_string(),
        name: name.to_string(),
        arguments: args,
    };
    (content, vec![call])
}

pub struct LocalProvider {
    client: Client,
    endpoint: String,
    model: String,
    timeout_secs: u64,
}

impl LocalProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.local_endpoint.is_empty() {
            return Err(ShannonError::Config(
                "local provider requires llm.local_endpoint".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ShannonError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.local_endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Flatten structured blocks into plain text the way the ReAct protocol
    /// expects observations to appear.
    fn build_messages(&self, request: &CompletionRequest) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = Vec::new();

        let system = if request.tools.is_empty() {
            request.system.clone()
        } else {
            Some(build_react_system(request.system.as_deref(), &request.tools))
        };
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }

        for msg in &request.messages {
            let mut text_parts: Vec<String> = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolResult { content, .. } => {
                        text_parts.push(format!("Observation: {content}"));
                    }
                    ContentBlock::ToolUse { name, input, .. } => {
                        text_parts.push(format!(
                            "Action: {name}\nAction Input: {}",
                            serde_json::to_string(input).unwrap_or_default()
                        ));
                    }
                }
            }
            messages.push(serde_json::json!({
                "role": msg.role.as_str(),
                "content": text_parts.join("\n"),
            }));
        }

        messages
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let result = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
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
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ShannonError::Provider(format!("HTTP {status}: {text}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": self.build_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let data: serde_json::Value = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| ShannonError::Provider(e.to_string()))?;

        let choice = &data["choices"][0];
        let msg = &choice["message"];
        let mut content = msg["content"].as_str().unwrap_or("").to_string();

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if let Some(native) = msg["tool_calls"].as_array() {
            for tc in native {
                let func = &tc["function"];
                let arguments = match &func["arguments"] {
                    serde_json::Value::String(s) => {
                        serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
                    }
                    other => other.clone(),
                };
                tool_calls.push(ToolCall {
                    id: tc["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..12].to_string()),
                    name: func["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                });
            }
        } else if !request.tools.is_empty() {
            let (parsed_content, parsed_calls) = parse_react_response(&content);
            content = parsed_content;
            tool_calls = parsed_calls;
        }

        let stop_reason = if tool_calls.is_empty() {
            match choice["finish_reason"].as_str() {
                Some("length") => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            }
        } else {
            StopReason::ToolUse
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            stop_reason,
            input_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": self.build_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        let resp = self.post(&body).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                // SSE frames are newline-delimited `data: {...}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload.trim() == "[DONE]" {
                        let _ = tx.send(StreamChunk::Done(StopReason::EndTurn)).await;
                        return;
                    }
                    match serde_json::from_str::<serde_json::Value>(payload) {
                        Ok(data) => {
                            let delta = data["choices"][0]["delta"]["content"]
                                .as_str()
                                .unwrap_or_default();
                            if !delta.is_empty()
                                && tx
                                    .send(StreamChunk::TextDelta(delta.to_string()))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping malformed stream frame"),
                    }
                }
            }
            let _ = tx.send(StreamChunk::Done(StopReason::EndTurn)).await;
        });

        Ok(rx)
    }
}
