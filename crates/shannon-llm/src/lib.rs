//! # shannon-llm
//!
//! The LLM provider abstraction: a vendor-neutral completion interface with
//! native tool use (Anthropic) and a ReAct fallback for OpenAI-compatible
//! local endpoints that lack tool calling.

pub mod anthropic;
pub mod local;
pub mod mock;
pub mod provider;

pub use provider::{
    ChatMessage, CompletionRequest, ContentBlock, LlmProvider, LlmResponse, Role, StopReason,
    StreamChunk,
};

use std::sync::Arc;

use shannon_config::LlmConfig;
use shannon_core::{Result, ShannonError};

/// Select a provider implementation from config.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::new(config)?)),
        "local" => Ok(Arc::new(local::LocalProvider::new(config)?)),
        other => Err(ShannonError::Config(format!(
            "unknown llm provider '{other}' (expected 'anthropic' or 'local')"
        ))),
    }
}
