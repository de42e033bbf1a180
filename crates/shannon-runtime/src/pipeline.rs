//! The message-handling pipeline: rate limit → command dispatch → auth →
//! context → system prompt → tool-use loop → persistence → reply.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shannon_core::{Event, EventBus, IncomingMessage, OutgoingMessage, Tool, ToolSchema};
use shannon_llm::{ChatMessage, LlmProvider, Role};
use shannon_memory::MemoryStore;

use crate::auth::AuthManager;
use crate::commands::CommandHandler;
use crate::context::{ContextMessage, ContextStore};
use crate::executor::ToolExecutor;
use crate::prompt::build_system_prompt;

const RATE_LIMIT_REPLY: &str = "You're sending messages too quickly. Please slow down.";
const APOLOGY_REPLY: &str = "Sorry — I ran into a problem generating a reply. Please try again.";

/// Token budget handed to the memory export for each prompt.
const MEMORY_EXPORT_TOKENS: usize = 2000;

/// Tunables the pipeline needs from config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_context_tokens: usize,
    pub summarize_threshold: f32,
    pub request_timeout_secs: u64,
    pub dry_run: bool,
}

/// Orchestrates a single inbound message end to end.
pub struct MessageHandler {
    auth: Arc<AuthManager>,
    context: Arc<ContextStore>,
    executor: ToolExecutor,
    commands: Arc<CommandHandler>,
    bus: EventBus,
    tools: Vec<Arc<dyn Tool>>,
    memory: Arc<MemoryStore>,
    llm: Arc<dyn LlmProvider>,
    settings: PipelineSettings,
}

impl MessageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: Arc<AuthManager>,
        context: Arc<ContextStore>,
        executor: ToolExecutor,
        commands: Arc<CommandHandler>,
        bus: EventBus,
        tools: Vec<Arc<dyn Tool>>,
        memory: Arc<MemoryStore>,
        llm: Arc<dyn LlmProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            auth,
            context,
            executor,
            commands,
            bus,
            tools,
            memory,
            llm,
            settings,
        }
    }

    fn send(&self, platform: &str, channel: &str, content: &str, reply_to: Option<String>) {
        let mut message = OutgoingMessage::new(platform, channel, content);
        message.reply_to = reply_to;
        self.bus.publish(Event::MessageOutgoing(message));
    }

    /// Handle one inbound message. Every non-command message passes the
    /// rate limit and the auth lookup before any LLM call.
    pub async fn handle(&self, msg: IncomingMessage) {
        let platform = msg.platform.as_str();
        let channel = msg.channel.as_str();
        let user_id = msg.user_id.as_str();
        info!(platform, channel, user = %msg.user_id, "message received");

        // 1. Rate limit.
        if !self.auth.check_rate_limit(platform, user_id) {
            self.send(platform, channel, RATE_LIMIT_REPLY, None);
            return;
        }

        // 2. Slash commands bypass the LLM entirely.
        if msg.content.starts_with('/') {
            self.commands
                .handle(platform, channel, user_id, &msg.content)
                .await;
            return;
        }

        // 3. Effective permission. Public users may still chat; what
        // differs is the tool set below.
        let level = self.auth.effective_permission(platform, user_id);

        // 4. Persist the user turn before anything can fail downstream, so
        // a timed-out reply can be retried with the turn intact.
        if let Err(e) = self
            .context
            .append(platform, channel, Role::User, &msg.content)
        {
            error!(error = %e, "failed to persist user turn, aborting");
            self.send(platform, channel, APOLOGY_REPLY, None);
            return;
        }

        // 5. Assemble the prompt: context, permission-filtered tools,
        // memory export.
        let mut history = match self.context.get_context(platform, channel) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to load context, aborting");
                self.send(platform, channel, APOLOGY_REPLY, None);
                return;
            }
        };

        let available: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .filter(|t| t.required_permission() <= level)
            .cloned()
            .collect();
        let schemas: Vec<ToolSchema> = available.iter().map(|t| t.schema()).collect();

        let memory_export = self
            .memory
            .export_context(MEMORY_EXPORT_TOKENS)
            .unwrap_or_else(|e| {
                warn!(error = %e, "memory export failed, continuing without it");
                String::new()
            });
        let system = build_system_prompt(&available, &memory_export);

        // 6. Summarize when the projected prompt crowds the window.
        let projected: usize = history.iter().map(|m| m.token_estimate).sum::<usize>()
            + self.llm.count_tokens(&system);
        let budget =
            (self.settings.max_context_tokens as f32 * self.settings.summarize_threshold) as usize;
        if projected > budget {
            info!(projected, budget, "context over budget, summarizing");
            match self.context.summarize(platform, channel).await {
                Ok(_) => match self.context.get_context(platform, channel) {
                    Ok(h) => history = h,
                    Err(e) => warn!(error = %e, "context reload after summarize failed"),
                },
                Err(e) => warn!(error = %e, "summarization failed, continuing with full context"),
            }
        }

        // 7. Dry-run short-circuits the LLM for testing.
        if self.settings.dry_run {
            let preview: String = msg.content.chars().take(100).collect();
            self.send(
                platform,
                channel,
                &format!("[DRY RUN] Would process: {preview}"),
                None,
            );
            return;
        }

        // 8. The tool-use loop, bounded by the configured wall clock.
        let messages: Vec<ChatMessage> = history.iter().map(to_chat_message).collect();
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let reply = match tokio::time::timeout(
            timeout,
            self.executor.run(messages, system, schemas, level),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!(error = %e, "llm turn failed");
                self.send(platform, channel, APOLOGY_REPLY, None);
                return;
            }
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "llm turn timed out");
                self.send(platform, channel, APOLOGY_REPLY, None);
                return;
            }
        };

        if reply.is_empty() {
            return;
        }

        // 9. Persist the assistant turn, then reply on the originating
        // channel.
        if let Err(e) = self
            .context
            .append(platform, channel, Role::Assistant, &reply)
        {
            error!(error = %e, "failed to persist assistant turn, aborting");
            self.send(platform, channel, APOLOGY_REPLY, None);
            return;
        }
        let reply_to = (!msg.message_id.is_empty()).then(|| msg.message_id.clone());
        self.send(platform, channel, &reply, reply_to);
    }
}

/// Persisted rows become provider messages. Summary rows are stored with
/// the system role but travel as user turns, the way providers without
/// mid-conversation system messages expect them.
fn to_chat_message(msg: &ContextMessage) -> ChatMessage {
    let role = match msg.role {
        Role::Assistant => Role::Assistant,
        Role::User | Role::System => Role::User,
    };
    ChatMessage::text(role, msg.content.clone())
}
