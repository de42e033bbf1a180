use thiserror::Error;

/// Unified error type for the Shannon runtime.
#[derive(Error, Debug)]
pub enum ShannonError {
    // ── Gatekeeping ────────────────────────────────────────────
    #[error("rate limited")]
    RateLimited,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("validation failed: {0}")]
    Validation(String),

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    Provider(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool failure: {tool}: {reason}")]
    Tool { tool: String, reason: String },

    // ── Storage errors ─────────────────────────────────────────
    #[error("persistence error: {0}")]
    Persistence(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Lifecycle ──────────────────────────────────────────────
    #[error("cancelled")]
    Cancelled,

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ShannonError>;
