use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapping to `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShannonConfig {
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub webhooks: WebhooksConfig,
    pub context: ContextConfig,
    pub logging: LoggingConfig,
    /// Data directory for SQLite files. Empty = platform default.
    pub data_dir: String,
}

// ── LLM ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider backend: "anthropic" or "local".
    pub provider: String,
    pub model: String,
    /// API key. Empty = read from the provider's conventional env var.
    pub api_key: String,
    /// Base URL for the local OpenAI-compatible endpoint.
    pub local_endpoint: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 1.0).
    pub temperature: f32,
    /// Context window budget in tokens.
    pub max_context_tokens: usize,
    /// Wall-clock timeout per LLM call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            api_key: String::new(),
            local_endpoint: "http://localhost:11434/v1".into(),
            max_tokens: 4096,
            temperature: 0.7,
            max_context_tokens: 100_000,
            request_timeout_secs: 120,
        }
    }
}

// ── Auth ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// User identities as `platform:user_id` or bare `user_id`.
    pub admin_users: Vec<String>,
    pub operator_users: Vec<String>,
    pub trusted_users: Vec<String>,
    /// Messages allowed per user per minute.
    pub rate_limit_per_minute: usize,
    /// How long an approved sudo grant lasts.
    pub sudo_timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_users: vec![],
            operator_users: vec![],
            trusted_users: vec![],
            rate_limit_per_minute: 20,
            sudo_timeout_seconds: 300,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between heartbeat file writes.
    pub heartbeat_interval: u64,
    /// Heartbeat file path. Empty = `<data_dir>/heartbeat`.
    pub heartbeat_file: String,
    /// Jobs seeded at startup (idempotent by name).
    pub jobs: Vec<JobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: 30,
            heartbeat_file: String::new(),
            jobs: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub cron: String,
    /// Command descriptor published with the trigger event.
    pub action: String,
}

// ── Webhooks ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    pub endpoints: Vec<WebhookEndpointConfig>,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0".into(),
            port: 8420,
            endpoints: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookEndpointConfig {
    /// Endpoint name; selects the validation/normalization provider
    /// ("github", "sentry", anything else = generic shared secret).
    pub name: String,
    pub path: String,
    /// Shared secret. An empty secret rejects every request.
    pub secret: String,
    /// Destination as `"platform:channel"`.
    pub channel: String,
    /// Template for the synthetic user turn, e.g.
    /// `"GitHub {event_type}: {summary}"`.
    pub prompt_template: String,
}

// ── Context ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Messages loaded per channel for a turn.
    pub max_messages: usize,
    /// Fraction of the context window that triggers summarization.
    pub summarize_threshold: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            summarize_threshold: 0.7,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub fatal: bool,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ShannonConfig {
    /// Resolve the data directory, falling back to the platform default.
    pub fn data_dir(&self) -> PathBuf {
        if !self.data_dir.is_empty() {
            return PathBuf::from(&self.data_dir);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shannon")
    }

    /// Validate the config. Returns warnings; `Err` if any issue is fatal.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.llm.provider != "anthropic" && self.llm.provider != "local" {
            warnings.push(ConfigWarning {
                field: "llm.provider".into(),
                message: format!(
                    "unknown provider '{}' (expected 'anthropic' or 'local')",
                    self.llm.provider
                ),
                fatal: true,
            });
        }
        if self.llm.model.is_empty() {
            warnings.push(ConfigWarning {
                field: "llm.model".into(),
                message: "model is empty".into(),
                fatal: true,
            });
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            warnings.push(ConfigWarning {
                field: "llm.temperature".into(),
                message: format!("temperature {} is out of range", self.llm.temperature),
                fatal: true,
            });
        }
        if self.llm.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "llm.max_tokens".into(),
                message: "max_tokens is 0 — the agent cannot reply".into(),
                fatal: true,
            });
        }
        if self.auth.rate_limit_per_minute == 0 {
            warnings.push(ConfigWarning {
                field: "auth.rate_limit_per_minute".into(),
                message: "rate limit of 0 blocks every message".into(),
                fatal: false,
            });
        }
        if !(0.0..=1.0).contains(&self.context.summarize_threshold) {
            warnings.push(ConfigWarning {
                field: "context.summarize_threshold".into(),
                message: format!(
                    "threshold {} must be a fraction in 0..=1",
                    self.context.summarize_threshold
                ),
                fatal: true,
            });
        }
        for ep in &self.webhooks.endpoints {
            if ep.secret.is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("webhooks.endpoints.{}", ep.name),
                    message: "no secret configured — every request will be rejected".into(),
                    fatal: false,
                });
            }
            if !ep.path.starts_with('/') {
                warnings.push(ConfigWarning {
                    field: format!("webhooks.endpoints.{}", ep.name),
                    message: format!("path '{}' must start with '/'", ep.path),
                    fatal: true,
                });
            }
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.fatal)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(format!("configuration errors:\n  - {}", errors.join("\n  - ")));
        }
        Ok(warnings)
    }
}
