//! The tool-use loop: iterative LLM completion with permission-checked
//! tool execution.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use shannon_core::{PermissionLevel, Result, ToolCall, ToolMap, ToolResult, ToolSchema};
use shannon_llm::{ChatMessage, CompletionRequest, ContentBlock, LlmProvider, Role};

/// Hard bound on LLM↔tool round trips for a single user turn.
pub const MAX_ITERATIONS: usize = 10;

/// Appended to the reply when the loop is cut off at the iteration bound.
const EXHAUSTED_MARKER: &str = "\n\n[Stopped: reached the tool-use iteration limit.]";

/// Runs the bounded `LLM → tool calls → tool results → LLM` loop that
/// completes a single user turn.
pub struct ToolExecutor {
    llm: Arc<dyn LlmProvider>,
    tools: ToolMap,
    max_tokens: u32,
    temperature: f32,
}

impl ToolExecutor {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: ToolMap, max_tokens: u32, temperature: f32) -> Self {
        Self {
            llm,
            tools,
            max_tokens,
            temperature,
        }
    }

    /// Run the loop and return the final assistant text.
    ///
    /// `schemas` is the permission-filtered subset already presented to the
    /// model; `user_level` is re-checked per call anyway so a hallucinated
    /// tool name can never bypass the filter.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        system: String,
        schemas: Vec<ToolSchema>,
        user_level: PermissionLevel,
    ) -> Result<String> {
        let mut last_content = String::new();

        for _ in 0..MAX_ITERATIONS {
            let request = CompletionRequest {
                messages: messages.clone(),
                system: Some(system.clone()),
                tools: schemas.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };
            let response = self.llm.complete(&request).await?;
            last_content = response.content.clone();

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            // Record the assistant turn, tool-use blocks included.
            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            if !response.content.is_empty() {
                assistant_blocks.push(ContentBlock::Text {
                    text: response.content.clone(),
                });
            }
            for tc in &response.tool_calls {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                });
            }
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: assistant_blocks,
            });

            // Tool calls within one iteration are independent side effects;
            // evaluate them concurrently.
            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|tc| self.evaluate_call(tc, user_level)),
            )
            .await;

            let result_blocks: Vec<ContentBlock> = response
                .tool_calls
                .iter()
                .zip(results)
                .map(|(tc, result)| ContentBlock::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: if result.success {
                        result.output
                    } else {
                        format!("Error: {}", result.error)
                    },
                    is_error: !result.success,
                })
                .collect();
            messages.push(ChatMessage {
                role: Role::User,
                content: result_blocks,
            });
        }

        warn!("tool-use loop exhausted its iteration budget");
        Ok(format!("{last_content}{EXHAUSTED_MARKER}"))
    }

    /// Evaluate one tool call. Failures of any shape come back as a failed
    /// ToolResult and are fed to the LLM, never propagated.
    async fn evaluate_call(&self, call: &ToolCall, user_level: PermissionLevel) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(format!("Unknown tool '{}'", call.name));
        };
        if user_level < tool.required_permission() {
            return ToolResult::err(format!(
                "Permission denied. Tool '{}' requires {} level.",
                call.name,
                tool.required_permission()
            ));
        }
        info!(tool = %call.name, "executing tool");
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
