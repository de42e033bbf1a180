use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based position within the plan.
    pub id: u32,
    pub description: String,
    /// Tool to invoke; None means an LLM reasoning step.
    pub tool: Option<String>,
    /// Structured arguments for the tool. Always present when `tool` is.
    pub parameters: Option<Value>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl PlanStep {
    pub fn reasoning(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            tool: None,
            parameters: None,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "executing" => PlanStatus::Executing,
            "completed" => PlanStatus::Completed,
            "failed" => PlanStatus::Failed,
            _ => PlanStatus::Planning,
        }
    }
}

/// A goal decomposed into executable steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Short unique id.
    pub id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    /// Where progress messages go, as `"platform:channel"`. Empty = silent.
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
