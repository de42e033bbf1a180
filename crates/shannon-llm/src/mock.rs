//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls and
//! records every request for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use shannon_core::{Result, ShannonError, ToolCall};

use crate::provider::*;

/// A pre-configured response from the mock provider.
#[derive(Clone)]
pub struct MockResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    /// If set, the provider returns this error instead.
    pub error: Option<String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            error: None,
        }
    }
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            content: text.to_string(),
            ..Default::default()
        }
    }
}

/// A mock provider with a queue of scripted responses.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Every request received, for assertions in tests.
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse::text(text));
        self
    }

    /// Queue a tool-call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        let mut responses = self.responses.lock();
        let id = format!("call_{}", responses.len());
        responses.push(MockResponse {
            tool_calls: vec![ToolCall {
                id,
                name: name.to_string(),
                arguments: args,
            }],
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        });
        drop(responses);
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push(MockResponse {
            error: Some(error.to_string()),
            ..Default::default()
        });
        self
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push(resp);
        self
    }

    /// Handle to the recorded requests.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(ShannonError::Provider(error));
        }

        Ok(LlmResponse {
            content: mock.content,
            stop_reason: mock.stop_reason,
            input_tokens: 100,
            output_tokens: 50,
            tool_calls: mock.tool_calls,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            if let Some(error) = mock.error {
                let _ = tx.send(StreamChunk::Error(error)).await;
                return;
            }
            for word in mock.content.split_whitespace() {
                let _ = tx.send(StreamChunk::TextDelta(format!("{word} "))).await;
            }
            for tc in mock.tool_calls {
                let _ = tx.send(StreamChunk::ToolCall(tc)).await;
            }
            let _ = tx.send(StreamChunk::Done(mock.stop_reason)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::text(Role::User, "hello")])
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new().with_response("Hello!");
        let resp = provider.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_mock_tool_call() {
        let provider =
            MockProvider::new().with_tool_call("shell", serde_json::json!({"command": "ls"}));
        let resp = provider.complete(&request()).await.unwrap();
        assert_eq!(resp.tool_calls[0].name, "shell");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
    }

    #[tokio::test]
    async fn test_mock_error() {
        let provider = MockProvider::new().with_error("HTTP 500");
        assert!(provider.complete(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let provider = MockProvider::new().with_response("ok");
        let mut req = request();
        req.system = Some("be nice".into());
        let _ = provider.complete(&req).await;
        let recorded = provider.recorded_requests();
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system.as_deref(), Some("be nice"));
    }

    #[tokio::test]
    async fn test_mock_responses_in_order() {
        let provider = MockProvider::new()
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.complete(&request()).await.unwrap().content, "first");
        assert_eq!(
            provider.complete(&request()).await.unwrap().content,
            "second"
        );
    }

    #[tokio::test]
    async fn test_mock_streaming() {
        let provider = MockProvider::new().with_response("Hello world");
        let mut rx = provider.stream(&request()).await.unwrap();
        let mut chunks = vec![];
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert!(chunks.len() >= 3);
        assert!(matches!(chunks.last().unwrap(), StreamChunk::Done(_)));
    }
}
