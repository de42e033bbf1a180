//! The `plan` meta-tool: decompose a goal and execute it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use shannon_core::{PermissionLevel, Result, Tool, ToolResult};

use crate::engine::PlanEngine;
use crate::models::StepStatus;

pub struct PlanTool {
    engine: Arc<PlanEngine>,
}

impl PlanTool {
    pub fn new(engine: Arc<PlanEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for PlanTool {
    fn name(&self) -> &str {
        "plan"
    }

    fn description(&self) -> &str {
        "Create and execute a multi-step plan for a complex goal. \
         Decomposes into steps, executes sequentially, reports progress."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "goal": {
                    "type": "string",
                    "description": "The goal to accomplish."
                }
            },
            "required": ["goal"]
        })
    }

    fn required_permission(&self) -> PermissionLevel {
        PermissionLevel::Operator
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let Some(goal) = args.get("goal").and_then(Value::as_str) else {
            return Ok(ToolResult::err("Missing required parameter 'goal'."));
        };

        let mut plan = match self.engine.create_plan(goal, "", "").await {
            Ok(plan) => plan,
            Err(e) => return Ok(ToolResult::err(e.to_string())),
        };
        if let Err(e) = self
            .engine
            .execute_plan(&mut plan, PermissionLevel::Operator)
            .await
        {
            return Ok(ToolResult::err(e.to_string()));
        }

        let mut lines = vec![format!("Plan: {} [{}]", plan.goal, plan.status.as_str())];
        for step in &plan.steps {
            let icon = match step.status {
                StepStatus::Done => "+",
                StepStatus::Failed => "x",
                StepStatus::Skipped => "~",
                _ => "?",
            };
            lines.push(format!("  [{icon}] {}", step.description));
            if let Some(result) = &step.result {
                let preview: String = result.chars().take(200).collect();
                lines.push(format!("      Result: {preview}"));
            }
            if let Some(error) = &step.error {
                let preview: String = error.chars().take(200).collect();
                lines.push(format!("      Error: {preview}"));
            }
        }

        Ok(ToolResult {
            success: plan.status == crate::models::PlanStatus::Completed,
            output: lines.join("\n"),
            error: String::new(),
        })
    }
}
