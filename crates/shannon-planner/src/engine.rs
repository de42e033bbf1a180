//! Plan creation, execution, failure adjudication, and persistence.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use shannon_core::{
    ChannelTarget, Event, EventBus, OutgoingMessage, PermissionLevel, Result, ShannonError,
    ToolMap, ToolResult,
};
use shannon_llm::{ChatMessage, CompletionRequest, LlmProvider, Role};
use std::sync::Arc;

use crate::models::{Plan, PlanStatus, PlanStep, StepStatus};

/// Hard bound on plan length.
pub const MAX_STEPS: usize = 8;
/// Hard bound on tool invocations across a whole plan.
pub const MAX_TOOL_INVOCATIONS: usize = 15;

const CAP_REACHED: &str = "Tool invocation cap reached";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS plans (
        id TEXT PRIMARY KEY,
        goal TEXT NOT NULL,
        steps_json TEXT NOT NULL,
        status TEXT NOT NULL,
        channel TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

fn create_plan_prompt(tools: &str, goal: &str, context: &str) -> String {
    format!(
        "Decompose the following goal into 2-8 concrete steps. Each step should be \
         a single action. For steps that use a tool, specify the tool name and a \
         `parameters` object holding the exact arguments to pass it. For \
         reasoning/analysis steps, set tool to null and omit parameters.\n\n\
         Available tools: {tools}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"steps\": [{{\"description\": \"...\", \"tool\": \"tool_name_or_null\", \"parameters\": {{...}}}}]}}\n\n\
         Goal: {goal}\n\n\
         Context: {context}"
    )
}

fn failure_prompt(step: &PlanStep, plan_state: &str) -> String {
    format!(
        "Step {} failed with error: {}\n\n\
         Current plan state:\n{plan_state}\n\n\
         Should we retry this step, skip it, or abort the plan?\n\
         Respond with ONLY a JSON object: {{\"action\": \"retry\" | \"skip\" | \"abort\"}}",
        step.id,
        step.error.as_deref().unwrap_or("unknown"),
    )
}

/// What the adjudicator decided about a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    Retry,
    Skip,
    Abort,
}

/// Creates, executes, and persists plans. Constructed with the tool map
/// that excludes the `plan` tool itself, so a plan can never recurse.
pub struct PlanEngine {
    llm: Arc<dyn LlmProvider>,
    tools: ToolMap,
    bus: EventBus,
    db: Mutex<Connection>,
}

impl PlanEngine {
    pub fn open(
        llm: Arc<dyn LlmProvider>,
        tools: ToolMap,
        bus: EventBus,
        path: &Path,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(persistence)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            llm,
            tools,
            bus,
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory(llm: Arc<dyn LlmProvider>, tools: ToolMap, bus: EventBus) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            llm,
            tools,
            bus,
            db: Mutex::new(conn),
        })
    }

    /// Ask the LLM to decompose a goal, then persist the resulting plan.
    pub async fn create_plan(&self, goal: &str, channel: &str, context: &str) -> Result<Plan> {
        let tool_names = if self.tools.is_empty() {
            "none".to_string()
        } else {
            let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
            names.sort_unstable();
            names.join(", ")
        };
        let context = if context.is_empty() {
            "No additional context."
        } else {
            context
        };

        let request = CompletionRequest {
            messages: vec![ChatMessage::text(
                Role::User,
                create_plan_prompt(&tool_names, goal, context),
            )],
            system: None,
            tools: vec![],
            max_tokens: 1024,
            temperature: 0.3,
        };
        let response = self.llm.complete(&request).await?;
        let steps = parse_steps(&response.content);

        let now = Utc::now();
        let plan = Plan {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            goal: goal.to_string(),
            steps,
            status: PlanStatus::Planning,
            channel: channel.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.save_plan(&plan)?;
        info!(plan_id = %plan.id, steps = plan.steps.len(), "plan created");
        Ok(plan)
    }

    /// Execute the plan's steps in order, adjudicating failures and
    /// honoring the global tool-invocation cap.
    pub async fn execute_plan(&self, plan: &mut Plan, user_level: PermissionLevel) -> Result<()> {
        plan.status = PlanStatus::Executing;
        let mut tool_invocations = 0usize;
        let total = plan.steps.len();

        'steps: for index in 0..total {
            if plan.steps[index].tool.is_some() && tool_invocations >= MAX_TOOL_INVOCATIONS {
                let step = &mut plan.steps[index];
                step.status = StepStatus::Skipped;
                step.error = Some(CAP_REACHED.to_string());
                self.save_progress(plan)?;
                self.emit_progress(plan, index, total);
                continue;
            }

            let mut attempts = 0usize;
            loop {
                attempts += 1;
                plan.steps[index].status = StepStatus::Running;
                self.save_progress(plan)?;

                let outcome = if plan.steps[index].tool.is_some() {
                    self.run_tool_step(&plan.steps[index], user_level, &mut tool_invocations)
                        .await
                } else {
                    self.run_reasoning_step(plan, index).await
                };

                match outcome {
                    Ok(output) => {
                        let step = &mut plan.steps[index];
                        step.status = StepStatus::Done;
                        step.result = Some(output);
                        step.error = None;
                        break;
                    }
                    Err(error) => {
                        let step = &mut plan.steps[index];
                        step.status = StepStatus::Failed;
                        step.error = Some(error);

                        match self.adjudicate_failure(plan, index).await {
                            FailureAction::Abort => {
                                plan.status = PlanStatus::Failed;
                                self.save_progress(plan)?;
                                self.emit_progress(plan, index, total);
                                break 'steps;
                            }
                            FailureAction::Retry
                                if attempts < 2
                                    && !(plan.steps[index].tool.is_some()
                                        && tool_invocations >= MAX_TOOL_INVOCATIONS) =>
                            {
                                continue;
                            }
                            FailureAction::Retry | FailureAction::Skip => {
                                let step = &mut plan.steps[index];
                                step.status = StepStatus::Skipped;
                                // A retry blocked by the cap records why.
                                if step.tool.is_some() && tool_invocations >= MAX_TOOL_INVOCATIONS {
                                    step.error = Some(CAP_REACHED.to_string());
                                }
                                break;
                            }
                        }
                    }
                }
            }

            self.save_progress(plan)?;
            self.emit_progress(plan, index, total);
        }

        if plan.status != PlanStatus::Failed {
            plan.status = PlanStatus::Completed;
        }
        self.save_progress(plan)?;
        Ok(())
    }

    /// Run one tool step. Errors come back as strings so the adjudicator
    /// can reason about them.
    async fn run_tool_step(
        &self,
        step: &PlanStep,
        user_level: PermissionLevel,
        tool_invocations: &mut usize,
    ) -> std::result::Result<String, String> {
        let name = step.tool.as_deref().unwrap_or_default();
        let Some(tool) = self.tools.get(name) else {
            return Err(format!("Unknown tool: {name}"));
        };
        if user_level < tool.required_permission() {
            return Err(format!("Permission denied for {name}"));
        }
        let args = step.parameters.clone().unwrap_or(Value::Null);
        info!(tool = name, step = step.id, "executing plan step");
        *tool_invocations += 1;
        let result: ToolResult = match tool.execute(args).await {
            Ok(r) => r,
            Err(e) => return Err(e.to_string()),
        };
        if result.success {
            Ok(result.output)
        } else {
            Err(result.error)
        }
    }

    /// Run a reasoning step: goal + step description + prior results.
    async fn run_reasoning_step(
        &self,
        plan: &Plan,
        index: usize,
    ) -> std::result::Result<String, String> {
        let prompt = format!(
            "Plan goal: {}\nCurrent step: {}\nPrevious results: {}",
            plan.goal,
            plan.steps[index].description,
            summarize_results(plan),
        );
        let request = CompletionRequest {
            messages: vec![ChatMessage::text(Role::User, prompt)],
            system: None,
            tools: vec![],
            max_tokens: 512,
            temperature: 0.5,
        };
        match self.llm.complete(&request).await {
            Ok(response) => Ok(response.content),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Ask the LLM whether to retry, skip, or abort. Defaults to skip on
    /// any parse or provider failure.
    async fn adjudicate_failure(&self, plan: &Plan, index: usize) -> FailureAction {
        let plan_state = plan
            .steps
            .iter()
            .map(|s| format!("  {}. [{}] {}", s.id, s.status.as_str(), s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest {
            messages: vec![ChatMessage::text(
                Role::User,
                failure_prompt(&plan.steps[index], &plan_state),
            )],
            system: None,
            tools: vec![],
            max_tokens: 64,
            temperature: 0.1,
        };
        let Ok(response) = self.llm.complete(&request).await else {
            return FailureAction::Skip;
        };
        match serde_json::from_str::<Value>(strip_code_fences(&response.content)) {
            Ok(data) => match data.get("action").and_then(Value::as_str) {
                Some("retry") => FailureAction::Retry,
                Some("abort") => FailureAction::Abort,
                _ => FailureAction::Skip,
            },
            Err(_) => FailureAction::Skip,
        }
    }

    fn emit_progress(&self, plan: &Plan, index: usize, total: usize) {
        let Some(target) = ChannelTarget::parse(&plan.channel) else {
            return;
        };
        let step = &plan.steps[index];
        let icon = match step.status {
            StepStatus::Done => "+",
            StepStatus::Failed => "x",
            _ => "~",
        };
        self.bus
            .publish(Event::MessageOutgoing(OutgoingMessage::new(
                target.platform,
                target.channel,
                format!(
                    "Step {}/{total} {}: {} [{icon}]",
                    step.id,
                    step.status.as_str(),
                    step.description
                ),
            )));
    }

    fn save_progress(&self, plan: &mut Plan) -> Result<()> {
        plan.updated_at = Utc::now();
        self.save_plan(plan)
    }

    // ── Persistence ────────────────────────────────────────────

    pub fn save_plan(&self, plan: &Plan) -> Result<()> {
        let steps_json = serde_json::to_string(&plan.steps)?;
        self.db
            .lock()
            .execute(
                "INSERT INTO plans (id, goal, steps_json, status, channel, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    steps_json = excluded.steps_json,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                params![
                    plan.id,
                    plan.goal,
                    steps_json,
                    plan.status.as_str(),
                    plan.channel,
                    plan.created_at.to_rfc3339(),
                    plan.updated_at.to_rfc3339(),
                ],
            )
            .map_err(persistence)?;
        Ok(())
    }

    pub fn load_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, goal, steps_json, status, channel, created_at, updated_at
                 FROM plans WHERE id = ?1",
            )
            .map_err(persistence)?;
        let row = stmt
            .query_row(params![plan_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(persistence)?;

        let Some((id, goal, steps_json, status, channel, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let steps: Vec<PlanStep> = serde_json::from_str(&steps_json)?;
        Ok(Some(Plan {
            id,
            goal,
            steps,
            status: PlanStatus::parse(&status),
            channel,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        }))
    }
}

/// Parse the decomposition response. Steps with a tool but no `parameters`
/// object are rejected: a description is not a command.
fn parse_steps(content: &str) -> Vec<PlanStep> {
    let text = strip_code_fences(content);
    let raw_steps = match serde_json::from_str::<Value>(text) {
        Ok(data) => data
            .get("steps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Err(_) => {
            let preview: String = content.chars().take(200).collect();
            warn!(preview = %preview, "plan parse failed");
            vec![]
        }
    };

    let mut steps: Vec<PlanStep> = Vec::new();
    for raw in raw_steps {
        if steps.len() >= MAX_STEPS {
            break;
        }
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Step {}", steps.len() + 1));
        let tool = match raw.get("tool") {
            Some(Value::String(s)) if s != "null" && !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let parameters = raw.get("parameters").filter(|p| p.is_object()).cloned();
        if tool.is_some() && parameters.is_none() {
            warn!(description = %description, "rejecting tool step without parameters object");
            continue;
        }
        steps.push(PlanStep {
            id: steps.len() as u32 + 1,
            description,
            tool,
            parameters,
            status: StepStatus::Pending,
            result: None,
            error: None,
        });
    }

    if steps.is_empty() {
        steps.push(PlanStep::reasoning(1, "Execute the goal directly"));
    }
    steps
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

fn summarize_results(plan: &Plan) -> String {
    let parts: Vec<String> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Done)
        .filter_map(|s| {
            s.result.as_ref().map(|r| {
                let preview: String = r.chars().take(200).collect();
                format!("Step {}: {preview}", s.id)
            })
        })
        .collect();
    if parts.is_empty() {
        "No results yet.".to_string()
    } else {
        parts.join("\n")
    }
}

fn parse_ts(raw: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn persistence(e: rusqlite::Error) -> ShannonError {
    ShannonError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps_caps_at_eight() {
        let steps: Vec<Value> = (0..12)
            .map(|i| serde_json::json!({"description": format!("step {i}"), "tool": null}))
            .collect();
        let content = serde_json::json!({"steps": steps}).to_string();
        let parsed = parse_steps(&content);
        assert_eq!(parsed.len(), MAX_STEPS);
        assert_eq!(parsed[7].id, 8);
    }

    #[test]
    fn test_parse_steps_rejects_tool_without_parameters() {
        let content = serde_json::json!({"steps": [
            {"description": "run ls", "tool": "shell"},
            {"description": "think", "tool": null},
        ]})
        .to_string();
        let parsed = parse_steps(&content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "think");
    }

    #[test]
    fn test_parse_steps_accepts_fenced_json() {
        let content = "```json\n{\"steps\": [{\"description\": \"a\", \"tool\": null}]}\n```";
        let parsed = parse_steps(content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "a");
    }

    #[test]
    fn test_parse_steps_garbage_falls_back() {
        let parsed = parse_steps("not json at all");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "Execute the goal directly");
        assert!(parsed[0].tool.is_none());
    }

    #[test]
    fn test_tool_string_null_means_reasoning() {
        let content = serde_json::json!({"steps": [
            {"description": "a", "tool": "null"},
        ]})
        .to_string();
        let parsed = parse_steps(&content);
        assert!(parsed[0].tool.is_none());
    }
}
