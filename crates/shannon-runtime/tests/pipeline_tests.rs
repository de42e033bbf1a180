//! End-to-end behavior of the message pipeline, the tool-use loop, and the
//! slash commands, driven by the mock provider.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use shannon_config::{AuthConfig, SchedulerConfig};
use shannon_core::{
    Event, EventBus, EventKind, IncomingMessage, OutgoingMessage, PermissionLevel, Result, Tool,
    ToolMap, ToolResult,
};
use shannon_llm::mock::MockProvider;
use shannon_llm::{LlmProvider, Role};
use shannon_memory::MemoryStore;
use shannon_runtime::pipeline::PipelineSettings;
use shannon_runtime::{
    AuthManager, CommandHandler, ContextStore, MessageHandler, PauseManager, Scheduler,
    ToolExecutor,
};

/// A tool that records invocations; `shell` in these tests.
struct RecordingTool {
    name: &'static str,
    permission: PermissionLevel,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "records invocations"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"command": {"type": "string"}}
        })
    }
    fn required_permission(&self) -> PermissionLevel {
        self.permission
    }
    async fn execute(&self, _args: Value) -> Result<ToolResult> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::ok("ran fine"))
    }
}

struct Harness {
    bus: EventBus,
    handler: MessageHandler,
    provider: Arc<MockProvider>,
    context: Arc<ContextStore>,
    outgoing: mpsc::Receiver<OutgoingMessage>,
    shell_invocations: Arc<AtomicUsize>,
}

async fn harness(provider: MockProvider, auth_config: AuthConfig, dry_run: bool) -> Harness {
    let bus = EventBus::default();
    let provider = Arc::new(provider);
    let llm: Arc<dyn LlmProvider> = provider.clone();

    let context = Arc::new(ContextStore::open_in_memory(llm.clone(), 50).unwrap());
    let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
    let auth = Arc::new(AuthManager::new(auth_config));
    let pause = PauseManager::new(bus.clone());
    let scheduler =
        Scheduler::open_in_memory(SchedulerConfig::default(), bus.clone(), pause.clone()).unwrap();

    let shell_invocations = Arc::new(AtomicUsize::new(0));
    let shell: Arc<dyn Tool> = Arc::new(RecordingTool {
        name: "shell",
        permission: PermissionLevel::Operator,
        invocations: shell_invocations.clone(),
    });
    let tools = vec![shell.clone()];
    let mut tool_map = ToolMap::new();
    tool_map.insert("shell".into(), shell);

    let executor = ToolExecutor::new(llm.clone(), tool_map, 4096, 0.7);
    let commands = Arc::new(CommandHandler::new(
        auth.clone(),
        context.clone(),
        scheduler,
        memory.clone(),
        pause,
        bus.clone(),
    ));
    let handler = MessageHandler::new(
        auth,
        context.clone(),
        executor,
        commands,
        bus.clone(),
        tools,
        memory,
        llm,
        PipelineSettings {
            max_context_tokens: 100_000,
            summarize_threshold: 0.7,
            request_timeout_secs: 30,
            dry_run,
        },
    );

    let (tx, outgoing) = mpsc::channel(64);
    bus.subscribe(EventKind::MessageOutgoing, "capture", move |event| {
        let tx = tx.clone();
        async move {
            if let Event::MessageOutgoing(msg) = event {
                let _ = tx.send(msg).await;
            }
        }
    });
    bus.start().await;

    Harness {
        bus,
        handler,
        provider,
        context,
        outgoing,
        shell_invocations,
    }
}

fn default_auth() -> AuthConfig {
    AuthConfig {
        admin_users: vec!["admin".into()],
        operator_users: vec!["op".into()],
        trusted_users: vec![],
        rate_limit_per_minute: 100,
        sudo_timeout_seconds: 300,
    }
}

async fn recv(h: &mut Harness) -> OutgoingMessage {
    tokio::time::timeout(Duration::from_secs(2), h.outgoing.recv())
        .await
        .expect("expected an outgoing message")
        .expect("bus closed")
}

fn msg(user: &str, content: &str) -> IncomingMessage {
    IncomingMessage::text("discord", "ch1", user, content)
}

// ── Scenario: rate-limit gate ──────────────────────────────────

#[tokio::test]
async fn test_rate_limit_blocks_third_message_without_llm_call() {
    let provider = MockProvider::new().with_response("one").with_response("two");
    let auth = AuthConfig {
        rate_limit_per_minute: 2,
        ..default_auth()
    };
    let mut h = harness(provider, auth, false).await;

    h.handler.handle(msg("user1", "first")).await;
    h.handler.handle(msg("user1", "second")).await;
    h.handler.handle(msg("user1", "third")).await;

    assert_eq!(recv(&mut h).await.content, "one");
    assert_eq!(recv(&mut h).await.content, "two");
    assert!(recv(&mut h).await.content.contains("too quickly"));
    // Exactly two LLM calls; the rate-limited message never reached it.
    assert_eq!(h.provider.call_count(), 2);

    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Scenario: permission-filtered tools ────────────────────────

#[tokio::test]
async fn test_public_user_never_sees_operator_tool_schema() {
    let provider = MockProvider::new().with_response("ok");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("stranger", "run ls")).await;
    let _ = recv(&mut h).await;

    let requests = h.provider.recorded_requests();
    let requests = requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(
        requests[0].tools.iter().all(|t| t.name != "shell"),
        "public user must not be offered the shell schema"
    );

    drop(requests);
    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_operator_sees_and_invokes_tool() {
    let provider = MockProvider::new()
        .with_tool_call("shell", serde_json::json!({"command": "ls"}))
        .with_response("done: empty dir");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("op", "run ls")).await;
    assert_eq!(recv(&mut h).await.content, "done: empty dir");

    let requests = h.provider.recorded_requests();
    let requests = requests.lock();
    assert!(requests[0].tools.iter().any(|t| t.name == "shell"));
    assert_eq!(h.shell_invocations.load(Ordering::SeqCst), 1);

    drop(requests);
    h.bus.stop(Duration::from_secs(1)).await;
}

/// Even if the model hallucinates a call to a filtered tool, the executor
/// re-checks permission and the tool body never runs.
#[tokio::test]
async fn test_executor_rechecks_permission() {
    let provider = MockProvider::new()
        .with_tool_call("shell", serde_json::json!({"command": "rm -rf /"}))
        .with_response("understood, I cannot do that");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("stranger", "please run this")).await;
    let _ = recv(&mut h).await;
    assert_eq!(h.shell_invocations.load(Ordering::SeqCst), 0);

    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Tool-use loop bounds ───────────────────────────────────────

#[tokio::test]
async fn test_tool_loop_iteration_cap() {
    // The model calls the tool forever; the loop must cut it off.
    let mut provider = MockProvider::new();
    for _ in 0..12 {
        provider = provider.with_tool_call("shell", serde_json::json!({"command": "ls"}));
    }
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("op", "loop forever")).await;
    let reply = recv(&mut h).await;
    assert!(reply.content.contains("iteration limit"));
    assert_eq!(h.provider.call_count(), 10);
    assert_eq!(h.shell_invocations.load(Ordering::SeqCst), 10);

    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_tool_is_fed_back_not_fatal() {
    let provider = MockProvider::new()
        .with_tool_call("teleport", serde_json::json!({}))
        .with_response("sorry, no teleporter");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("op", "teleport me")).await;
    assert_eq!(recv(&mut h).await.content, "sorry, no teleporter");

    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Failure handling ───────────────────────────────────────────

#[tokio::test]
async fn test_provider_error_yields_apology_and_keeps_user_turn() {
    let provider = MockProvider::new().with_error("HTTP 500");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("user1", "hello?")).await;
    assert!(recv(&mut h).await.content.contains("Sorry"));

    // The user turn stayed in context for a retry.
    let history = h.context.get_context("discord", "ch1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello?");

    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_dry_run_skips_llm() {
    let provider = MockProvider::new();
    let mut h = harness(provider, default_auth(), true).await;

    h.handler.handle(msg("user1", "hello")).await;
    assert!(recv(&mut h).await.content.starts_with("[DRY RUN]"));
    assert_eq!(h.provider.call_count(), 0);

    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Scenario: summarization ────────────────────────────────────

#[tokio::test]
async fn test_summarize_command_halves_context_and_preserves_suffix() {
    let provider = MockProvider::new().with_response("They discussed fifty things.");
    let mut h = harness(provider, default_auth(), false).await;

    for i in 0..50 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        h.context
            .append("discord", "ch1", role, &format!("message number {i}"))
            .unwrap();
    }
    let before = h.context.get_context("discord", "ch1").unwrap();
    let suffix_before: Vec<String> = before[25..].iter().map(|m| m.content.clone()).collect();

    h.handler.handle(msg("user1", "/summarize")).await;
    let reply = recv(&mut h).await;
    assert!(reply.content.contains("**Summary:**"));
    assert!(reply.content.contains("They discussed fifty things."));

    let after = h.context.get_context("discord", "ch1").unwrap();
    assert_eq!(after.len(), 26, "25 oldest rows replaced by one summary row");
    assert_eq!(after[0].role, Role::System);
    assert!(after[0].content.contains("They discussed fifty things."));

    let suffix_after: Vec<String> = after[1..].iter().map(|m| m.content.clone()).collect();
    assert_eq!(suffix_before, suffix_after, "preserved suffix must be untouched");

    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_summarize_small_context_is_noop() {
    let provider = MockProvider::new();
    let mut h = harness(provider, default_auth(), false).await;

    h.context
        .append("discord", "ch1", Role::User, "only message")
        .unwrap();
    h.handler.handle(msg("user1", "/summarize")).await;
    assert!(recv(&mut h).await.content.contains("No context to summarize"));
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.context.get_context("discord", "ch1").unwrap().len(), 1);

    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Commands ───────────────────────────────────────────────────

#[tokio::test]
async fn test_help_lists_commands() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;
    h.handler.handle(msg("stranger", "/help")).await;
    let reply = recv(&mut h).await;
    assert!(reply.content.contains("/sudo"));
    assert!(reply.content.contains("/pause"));
    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_forget_requires_operator() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;
    h.context
        .append("discord", "ch1", Role::User, "secret stuff")
        .unwrap();

    h.handler.handle(msg("stranger", "/forget")).await;
    assert!(recv(&mut h).await.content.contains("Operator access required"));
    assert_eq!(h.context.get_context("discord", "ch1").unwrap().len(), 1);

    h.handler.handle(msg("op", "/forget")).await;
    assert!(recv(&mut h).await.content.contains("Cleared 1 messages"));
    assert!(h.context.get_context("discord", "ch1").unwrap().is_empty());

    // No LLM calls for any of this.
    assert_eq!(h.provider.call_count(), 0);
    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_sudo_protocol_roundtrip() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;

    h.handler.handle(msg("stranger", "/sudo operator")).await;
    let reply = recv(&mut h).await.content;
    assert!(reply.contains("sudo-1"), "{reply}");

    // A non-admin cannot approve.
    h.handler.handle(msg("op", "/sudo approve sudo-1")).await;
    assert!(recv(&mut h).await.content.contains("Failed to approve"));

    h.handler.handle(msg("admin", "/sudo approve sudo-1")).await;
    assert!(recv(&mut h).await.content.contains("approved"));

    // The requester can now use operator commands.
    h.handler.handle(msg("stranger", "/forget")).await;
    assert!(recv(&mut h).await.content.contains("Cleared"));

    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_sudo_bad_level_shows_usage() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;
    h.handler.handle(msg("stranger", "/sudo root")).await;
    assert!(recv(&mut h).await.content.contains("Usage:"));
    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_pause_status_resume_cycle() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;

    h.handler.handle(msg("op", "/pause")).await;
    assert!(recv(&mut h).await.content.contains("Paused"));

    h.handler.handle(msg("stranger", "/status")).await;
    assert!(recv(&mut h).await.content.contains("Paused"));

    h.handler.handle(msg("op", "/resume")).await;
    assert!(recv(&mut h).await.content.contains("Resumed"));

    h.handler.handle(msg("stranger", "/status")).await;
    assert!(recv(&mut h).await.content.contains("Active"));

    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_pause_requires_operator() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;
    h.handler.handle(msg("stranger", "/pause")).await;
    assert!(recv(&mut h).await.content.contains("Operator access required"));
    h.bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_command() {
    let mut h = harness(MockProvider::new(), default_auth(), false).await;
    h.handler.handle(msg("stranger", "/frobnicate")).await;
    assert!(recv(&mut h).await.content.contains("Unknown command"));
    assert_eq!(h.provider.call_count(), 0);
    h.bus.stop(Duration::from_secs(1)).await;
}

// ── Context persistence across turns ───────────────────────────

#[tokio::test]
async fn test_turns_are_persisted_in_order() {
    let provider = MockProvider::new().with_response("hi there");
    let mut h = harness(provider, default_auth(), false).await;

    h.handler.handle(msg("user1", "hello bot")).await;
    let _ = recv(&mut h).await;

    let history = h.context.get_context("discord", "ch1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hello bot");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "hi there");

    h.bus.stop(Duration::from_secs(1)).await;
}
