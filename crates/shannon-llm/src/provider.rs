use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use shannon_core::{Result, ToolCall, ToolSchema};

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single content block within a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A message in the conversation handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// All text blocks joined together.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// System prompt, separate from messages.
    pub system: Option<String>,
    /// Tools the model may call.
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            system: None,
            tools: vec![],
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// A complete response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta(String),
    ToolCall(ToolCall),
    Done(StopReason),
    Error(String),
}

/// ~4 chars per token for English text, minimum 1.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Trait implemented by each LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name, e.g. "anthropic", "local".
    fn name(&self) -> &str;

    /// Send a completion request and wait for the full response.
    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse>;

    /// Send a streaming request. The default chunks a full completion;
    /// providers with a native streaming wire override this.
    async fn stream(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if !response.content.is_empty() {
                let _ = tx.send(StreamChunk::TextDelta(response.content)).await;
            }
            for tc in response.tool_calls {
                let _ = tx.send(StreamChunk::ToolCall(tc)).await;
            }
            let _ = tx.send(StreamChunk::Done(response.stop_reason)).await;
        });
        Ok(rx)
    }

    /// Best-effort token count for budgeting.
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}
