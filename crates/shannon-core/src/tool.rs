use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::PermissionLevel;

/// The outcome of executing a tool call. Failures are data, not errors:
/// they are fed back to the LLM so it can recover.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }
}

/// The schema a tool presents to an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Name → tool handle registry, shared across the executor and planner.
pub type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// Capability interface implemented by every tool the agent can invoke.
///
/// Implementations that wrap blocking APIs (subprocesses, PTYs) must
/// offload that work to a blocking pool inside `execute`; the caller runs
/// on the async runtime and must never stall the bus.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, e.g. "memory_set", "shell".
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Minimum permission level required to invoke this tool.
    fn required_permission(&self) -> PermissionLevel {
        PermissionLevel::Trusted
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// Release any held resources. Called once at shutdown.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// The schema handed to LLM providers.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters(),
        }
    }
}
