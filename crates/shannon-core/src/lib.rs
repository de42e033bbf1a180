//! # shannon-core
//!
//! Core types, traits, and primitives for the Shannon conversational agent.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the error type, the event bus, message models, the tool
//! contract, and the permission ladder.

pub mod error;
pub mod event;
pub mod message;
pub mod tool;
pub mod types;

pub use error::{Result, ShannonError};
pub use event::{Event, EventBus, EventKind};
pub use message::{Attachment, IncomingMessage, OutgoingMessage};
pub use tool::{Tool, ToolCall, ToolMap, ToolResult, ToolSchema};
pub use types::{ChannelTarget, PermissionLevel, WebhookEvent};
