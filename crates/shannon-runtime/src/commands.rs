//! Slash-command dispatch with per-command permission gates.
//!
//! Denials reply with a short explanation and never fall through to the LLM.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use shannon_core::{Event, EventBus, OutgoingMessage, PermissionLevel};
use shannon_memory::MemoryStore;

use crate::auth::AuthManager;
use crate::context::ContextStore;
use crate::pause::{PauseManager, parse_duration};
use crate::scheduler::Scheduler;

const HELP_TEXT: &str = "**Commands:** /help, /context, /summarize, /forget, /jobs, /sudo, /memory, /pause, /resume, /status";

/// Dispatches slash commands (prefix `/`).
pub struct CommandHandler {
    auth: Arc<AuthManager>,
    context: Arc<ContextStore>,
    scheduler: Scheduler,
    memory: Arc<MemoryStore>,
    pause: PauseManager,
    bus: EventBus,
}

impl CommandHandler {
    pub fn new(
        auth: Arc<AuthManager>,
        context: Arc<ContextStore>,
        scheduler: Scheduler,
        memory: Arc<MemoryStore>,
        pause: PauseManager,
        bus: EventBus,
    ) -> Self {
        Self {
            auth,
            context,
            scheduler,
            memory,
            pause,
            bus,
        }
    }

    fn send(&self, platform: &str, channel: &str, content: impl Into<String>) {
        self.bus.publish(Event::MessageOutgoing(OutgoingMessage::new(
            platform, channel, content,
        )));
    }

    fn gate(
        &self,
        platform: &str,
        channel: &str,
        user_id: &str,
        required: PermissionLevel,
    ) -> bool {
        if self.auth.check_permission(platform, user_id, required) {
            return true;
        }
        info!(platform, user_id, required = %required, "command denied");
        self.send(
            platform,
            channel,
            format!("{} access required.", capitalize(required.name())),
        );
        false
    }

    /// Handle one slash command end to end.
    pub async fn handle(&self, platform: &str, channel: &str, user_id: &str, content: &str) {
        let trimmed = content.trim();
        let (command, args) = match trimmed.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (trimmed, ""),
        };

        match command.to_lowercase().as_str() {
            "/help" => self.send(platform, channel, HELP_TEXT),
            "/context" => self.handle_context(platform, channel),
            "/summarize" => self.handle_summarize(platform, channel).await,
            "/forget" => self.handle_forget(platform, channel, user_id),
            "/jobs" => self.handle_jobs(platform, channel, user_id),
            "/sudo" => self.handle_sudo(platform, channel, user_id, args),
            "/memory" => self.handle_memory(platform, channel, user_id, args),
            "/pause" => self.handle_pause(platform, channel, user_id, args),
            "/resume" => self.handle_resume(platform, channel, user_id),
            "/status" => self.handle_status(platform, channel),
            other => self.send(platform, channel, format!("Unknown command: {other}")),
        }
    }

    fn handle_context(&self, platform: &str, channel: &str) {
        match self.context.stats(platform, channel) {
            Ok(stats) => self.send(
                platform,
                channel,
                format!(
                    "Context: {} messages, {} chars (~{} tokens)",
                    stats.message_count, stats.total_chars, stats.total_tokens
                ),
            ),
            Err(e) => self.send(platform, channel, format!("Failed to read context: {e}")),
        }
    }

    async fn handle_summarize(&self, platform: &str, channel: &str) {
        match self.context.summarize(platform, channel).await {
            Ok(Some(summary)) => {
                self.send(platform, channel, format!("**Summary:**\n{summary}"));
            }
            Ok(None) => self.send(platform, channel, "No context to summarize."),
            Err(e) => self.send(platform, channel, format!("Summarization failed: {e}")),
        }
    }

    fn handle_forget(&self, platform: &str, channel: &str, user_id: &str) {
        if !self.gate(platform, channel, user_id, PermissionLevel::Operator) {
            return;
        }
        match self.context.clear(platform, channel) {
            Ok(count) => self.send(
                platform,
                channel,
                format!("Cleared {count} messages from context."),
            ),
            Err(e) => self.send(platform, channel, format!("Failed to clear context: {e}")),
        }
    }

    fn handle_jobs(&self, platform: &str, channel: &str, user_id: &str) {
        if !self.gate(platform, channel, user_id, PermissionLevel::Trusted) {
            return;
        }
        match self.scheduler.list_jobs() {
            Ok(jobs) if jobs.is_empty() => self.send(platform, channel, "No scheduled jobs."),
            Ok(jobs) => {
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| format!("**{}** — `{}` — {}", j.name, j.cron_expr, j.action))
                    .collect();
                self.send(platform, channel, lines.join("\n"));
            }
            Err(e) => self.send(platform, channel, format!("Failed to list jobs: {e}")),
        }
    }

    fn handle_sudo(&self, platform: &str, channel: &str, user_id: &str, args: &str) {
        if args.is_empty() {
            // List pending requests (admin only).
            if !self.gate(platform, channel, user_id, PermissionLevel::Admin) {
                return;
            }
            let pending = self.auth.list_pending_sudo();
            if pending.is_empty() {
                self.send(platform, channel, "No pending sudo requests.");
            } else {
                let lines: Vec<String> = pending
                    .iter()
                    .map(|p| {
                        format!(
                            "`{}` — {}:{} → {} — {}",
                            p.request_id, p.platform, p.user_id, p.requested_level, p.reason
                        )
                    })
                    .collect();
                self.send(
                    platform,
                    channel,
                    format!("**Pending sudo requests:**\n{}", lines.join("\n")),
                );
            }
            return;
        }

        if let Some(request_id) = args.strip_prefix("approve ") {
            match self.auth.approve_sudo(request_id.trim(), platform, user_id) {
                Ok(()) => self.send(
                    platform,
                    channel,
                    format!("Sudo request `{}` approved.", request_id.trim()),
                ),
                Err(e) => self.send(platform, channel, format!("Failed to approve: {e}")),
            }
            return;
        }

        if let Some(request_id) = args.strip_prefix("deny ") {
            match self.auth.deny_sudo(request_id.trim()) {
                Ok(()) => self.send(
                    platform,
                    channel,
                    format!("Sudo request `{}` denied.", request_id.trim()),
                ),
                Err(e) => self.send(platform, channel, format!("Failed to deny: {e}")),
            }
            return;
        }

        // A user requesting elevation to a named level.
        let Ok(level) = args.parse::<PermissionLevel>() else {
            self.send(
                platform,
                channel,
                "Usage: /sudo <trusted|operator|admin>, /sudo approve <id>, /sudo deny <id>",
            );
            return;
        };
        let request_id = self.auth.request_sudo(platform, user_id, level, args);
        self.send(
            platform,
            channel,
            format!(
                "Sudo requested (`{request_id}`). An admin must approve with `/sudo approve {request_id}`."
            ),
        );
    }

    fn handle_memory(&self, platform: &str, channel: &str, user_id: &str, args: &str) {
        if let Some(query) = args.strip_prefix("search ") {
            let query = query.trim();
            match self.memory.search(query) {
                Ok(hits) if hits.is_empty() => {
                    self.send(platform, channel, format!("No memories matching '{query}'."));
                }
                Ok(hits) => {
                    let lines: Vec<String> = hits
                        .iter()
                        .take(20)
                        .map(|e| format!("**{}**: {} ({})", e.key, e.value, e.category))
                        .collect();
                    self.send(platform, channel, lines.join("\n"));
                }
                Err(e) => self.send(platform, channel, format!("Memory search failed: {e}")),
            }
            return;
        }

        if args == "clear" {
            if !self.gate(platform, channel, user_id, PermissionLevel::Admin) {
                return;
            }
            match self.memory.clear() {
                Ok(count) => self.send(platform, channel, format!("Cleared {count} memories.")),
                Err(e) => self.send(platform, channel, format!("Failed to clear memory: {e}")),
            }
            return;
        }

        match self.memory.export_context(2000) {
            Ok(export) if export.is_empty() => self.send(platform, channel, "No memories stored."),
            Ok(export) => self.send(platform, channel, format!("**Memories:**\n{export}")),
            Err(e) => self.send(platform, channel, format!("Failed to read memory: {e}")),
        }
    }

    fn handle_pause(&self, platform: &str, channel: &str, user_id: &str, args: &str) {
        if !self.gate(platform, channel, user_id, PermissionLevel::Operator) {
            return;
        }
        let duration = parse_duration(args);
        self.pause.pause(duration.map(Duration::from_secs));
        if duration.is_some() {
            self.send(
                platform,
                channel,
                format!(
                    "Paused for {}. I'll still respond if you message me directly.",
                    args.trim()
                ),
            );
        } else {
            self.send(
                platform,
                channel,
                "Paused indefinitely. Use /resume to resume. I'll still respond to direct messages.",
            );
        }
    }

    fn handle_resume(&self, platform: &str, channel: &str, user_id: &str) {
        if !self.gate(platform, channel, user_id, PermissionLevel::Operator) {
            return;
        }
        let count = self.pause.resume_and_flush();
        if count > 0 {
            self.send(
                platform,
                channel,
                format!("Resumed. {count} queued event(s) were missed."),
            );
        } else {
            self.send(platform, channel, "Resumed.");
        }
    }

    fn handle_status(&self, platform: &str, channel: &str) {
        if self.pause.is_paused() {
            let queued = self.pause.queued_count();
            self.send(
                platform,
                channel,
                format!("Status: **Paused** | {queued} queued event(s)"),
            );
        } else {
            self.send(platform, channel, "Status: **Active**");
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
