//! # shannon-runtime
//!
//! The event-driven core of Shannon: the authenticated message pipeline,
//! conversation context with LLM summarization, the bounded tool-use loop,
//! slash commands, the pause manager, and the heartbeat/cron scheduler.

pub mod auth;
pub mod commands;
pub mod context;
pub mod executor;
pub mod pause;
pub mod pipeline;
pub mod prompt;
pub mod scheduler;
pub mod tools;

pub use auth::AuthManager;
pub use commands::CommandHandler;
pub use context::{ContextMessage, ContextStats, ContextStore};
pub use executor::ToolExecutor;
pub use pause::{PauseManager, parse_duration};
pub use pipeline::{MessageHandler, PipelineSettings};
pub use prompt::build_system_prompt;
pub use scheduler::{Job, Scheduler};
pub use tools::ScheduleTool;
