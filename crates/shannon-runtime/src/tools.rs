//! The `schedule` tool: cron job management exposed to the LLM.

use async_trait::async_trait;
use serde_json::Value;

use shannon_core::{PermissionLevel, Result, Tool, ToolResult};

use crate::scheduler::Scheduler;

pub struct ScheduleTool {
    scheduler: Scheduler,
}

impl ScheduleTool {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ScheduleTool {
    fn name(&self) -> &str {
        "schedule"
    }

    fn description(&self) -> &str {
        "Manage scheduled cron jobs: add a recurring task, remove one, or list them."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "remove", "list"],
                    "description": "What to do."
                },
                "name": {
                    "type": "string",
                    "description": "Unique job name (add/remove)."
                },
                "cron": {
                    "type": "string",
                    "description": "Cron expression, e.g. '0 9 * * *' (add)."
                },
                "action": {
                    "type": "string",
                    "description": "What the job should do when it fires (add)."
                }
            },
            "required": ["operation"]
        })
    }

    fn required_permission(&self) -> PermissionLevel {
        PermissionLevel::Operator
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let operation = args.get("operation").and_then(Value::as_str).unwrap_or("");
        match operation {
            "add" => {
                let (Some(name), Some(cron), Some(action)) = (
                    args.get("name").and_then(Value::as_str),
                    args.get("cron").and_then(Value::as_str),
                    args.get("action").and_then(Value::as_str),
                ) else {
                    return Ok(ToolResult::err(
                        "'add' requires 'name', 'cron', and 'action'.",
                    ));
                };
                match self.scheduler.add_job(name, cron, action) {
                    Ok(job) => Ok(ToolResult::ok(format!(
                        "Scheduled '{}' ({}) — {}",
                        job.name, job.cron_expr, job.action
                    ))),
                    Err(e) => Ok(ToolResult::err(e.to_string())),
                }
            }
            "remove" => {
                let Some(name) = args.get("name").and_then(Value::as_str) else {
                    return Ok(ToolResult::err("'remove' requires 'name'."));
                };
                Ok(if self.scheduler.remove_job(name)? {
                    ToolResult::ok(format!("Removed job '{name}'."))
                } else {
                    ToolResult::err(format!("No job named '{name}'."))
                })
            }
            "list" => {
                let jobs = self.scheduler.list_jobs()?;
                if jobs.is_empty() {
                    return Ok(ToolResult::ok("No scheduled jobs."));
                }
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| format!("{} — `{}` — {}", j.name, j.cron_expr, j.action))
                    .collect();
                Ok(ToolResult::ok(lines.join("\n")))
            }
            other => Ok(ToolResult::err(format!(
                "Unknown operation '{other}' (expected add, remove, or list)."
            ))),
        }
    }
}
