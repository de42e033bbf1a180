//! Memory tools exposed to the LLM: remember, recall, forget.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use shannon_core::{PermissionLevel, Result, Tool, ToolResult};

use crate::store::MemoryStore;

fn str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Store a key/value pair in persistent memory.
pub struct MemorySetTool {
    store: Arc<MemoryStore>,
}

impl MemorySetTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemorySetTool {
    fn name(&self) -> &str {
        "memory_set"
    }

    fn description(&self) -> &str {
        "Store a key-value pair in persistent memory. Survives restarts."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key to store the value under."
                },
                "value": {
                    "type": "string",
                    "description": "The value to store."
                },
                "category": {
                    "type": "string",
                    "description": "Category for organizing memories.",
                    "default": "general"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let Some(key) = str_arg(&args, "key") else {
            return Ok(ToolResult::err("Missing required parameter 'key'."));
        };
        let Some(value) = str_arg(&args, "value") else {
            return Ok(ToolResult::err("Missing required parameter 'value'."));
        };
        let category = str_arg(&args, "category").unwrap_or("general");
        self.store.set(key, value, category, "agent")?;
        Ok(ToolResult::ok(format!("Stored: {key} = {value}")))
    }
}

/// Retrieve a memory by key, or search memories by query.
pub struct MemoryGetTool {
    store: Arc<MemoryStore>,
}

impl MemoryGetTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_get"
    }

    fn description(&self) -> &str {
        "Retrieve a memory by key, or search memories by query."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Exact key to look up."
                },
                "query": {
                    "type": "string",
                    "description": "Search term to find matching memories."
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        if let Some(key) = str_arg(&args, "key") {
            return Ok(match self.store.get(key)? {
                Some(entry) => ToolResult::ok(format!(
                    "[{}] {}: {}",
                    entry.category, entry.key, entry.value
                )),
                None => ToolResult::ok(format!("No memory found for key: {key}")),
            });
        }
        if let Some(query) = str_arg(&args, "query") {
            let hits = self.store.search(query)?;
            if hits.is_empty() {
                return Ok(ToolResult::ok(format!("No memories found matching: {query}")));
            }
            let lines: Vec<String> = hits
                .iter()
                .map(|e| format!("[{}] {}: {}", e.category, e.key, e.value))
                .collect();
            return Ok(ToolResult::ok(lines.join("\n")));
        }
        Ok(ToolResult::err("Provide either 'key' or 'query' parameter."))
    }
}

/// Delete a memory entry by key.
pub struct MemoryDeleteTool {
    store: Arc<MemoryStore>,
}

impl MemoryDeleteTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryDeleteTool {
    fn name(&self) -> &str {
        "memory_delete"
    }

    fn description(&self) -> &str {
        "Delete a memory entry by key."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The key of the memory to delete."
                }
            },
            "required": ["key"]
        })
    }

    fn required_permission(&self) -> PermissionLevel {
        PermissionLevel::Operator
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let Some(key) = str_arg(&args, "key") else {
            return Ok(ToolResult::err("Missing required parameter 'key'."));
        };
        Ok(if self.store.delete(key)? {
            ToolResult::ok(format!("Deleted memory: {key}"))
        } else {
            ToolResult::err(format!("No memory found for key: {key}"))
        })
    }
}
