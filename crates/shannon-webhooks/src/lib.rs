//! # shannon-webhooks
//!
//! HTTP ingress for external events: signature validation per provider,
//! normalization into `WebhookEvent`s, bus publication, and the
//! pause-aware ingestor that turns events into synthetic user turns.

pub mod handlers;
pub mod ingestor;
pub mod server;

pub use ingestor::{WEBHOOK_USER_ID, format_prompt, register_ingestor};
pub use server::{WebhookServer, router};
