//! # shannon-planner
//!
//! Goal decomposition and execution: the LLM breaks a goal into steps,
//! each step runs a tool or a reasoning call, failures are adjudicated by
//! the LLM (retry / skip / abort), and plans persist across restarts.

pub mod engine;
pub mod models;
pub mod tool;

pub use engine::{MAX_STEPS, MAX_TOOL_INVOCATIONS, PlanEngine};
pub use models::{Plan, PlanStatus, PlanStep, StepStatus};
pub use tool::PlanTool;
