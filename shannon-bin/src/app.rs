//! Composition root: wiring and lifecycle only.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shannon_config::ShannonConfig;
use shannon_core::{
    ChannelTarget, Event, EventBus, EventKind, IncomingMessage, Result, Tool, ToolMap,
};
use shannon_llm::create_provider;
use shannon_memory::{MemoryDeleteTool, MemoryGetTool, MemorySetTool, MemoryStore};
use shannon_planner::{PlanEngine, PlanTool};
use shannon_runtime::pipeline::PipelineSettings;
use shannon_runtime::{
    AuthManager, CommandHandler, ContextStore, MessageHandler, PauseManager, ScheduleTool,
    Scheduler, ToolExecutor,
};
use shannon_webhooks::{WEBHOOK_USER_ID, WebhookServer, register_ingestor};

/// Reserved sender id for scheduler-injected turns.
const SCHEDULER_USER_ID: &str = "scheduler";

const BUS_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

struct Shannon {
    bus: EventBus,
    scheduler: Scheduler,
    scheduler_enabled: bool,
    webhook_server: Option<WebhookServer>,
    tools: Vec<Arc<dyn Tool>>,
}

impl Shannon {
    fn build(mut config: ShannonConfig, dry_run: bool) -> Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let bus = EventBus::default();
        let llm = create_provider(&config.llm)?;
        info!(provider = llm.name(), model = %config.llm.model, "llm provider ready");

        let memory = Arc::new(MemoryStore::open(&data_dir.join("memory.db"))?);
        let context = Arc::new(ContextStore::open(
            &data_dir.join("context.db"),
            llm.clone(),
            config.context.max_messages,
        )?);

        // Synthetic senders (webhook ingestor, scheduler injection) act at
        // operator level.
        config
            .auth
            .operator_users
            .push(WEBHOOK_USER_ID.to_string());
        config
            .auth
            .operator_users
            .push(SCHEDULER_USER_ID.to_string());
        let auth = Arc::new(AuthManager::new(config.auth.clone()));

        let pause = PauseManager::new(bus.clone());
        let scheduler = Scheduler::open(
            config.scheduler.clone(),
            bus.clone(),
            pause.clone(),
            &data_dir,
        )?;

        // Base tools. The planner gets this map without the plan tool, so
        // a plan can never invoke the planner recursively.
        let mut tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(MemorySetTool::new(memory.clone())),
            Arc::new(MemoryGetTool::new(memory.clone())),
            Arc::new(MemoryDeleteTool::new(memory.clone())),
            Arc::new(ScheduleTool::new(scheduler.clone())),
        ];
        let planner_map: ToolMap = tools
            .iter()
            .map(|t| (t.name().to_string(), t.clone()))
            .collect();
        let planner = Arc::new(PlanEngine::open(
            llm.clone(),
            planner_map,
            bus.clone(),
            &data_dir.join("plans.db"),
        )?);
        tools.push(Arc::new(PlanTool::new(planner)));

        let tool_map: ToolMap = tools
            .iter()
            .map(|t| (t.name().to_string(), t.clone()))
            .collect();
        let executor = ToolExecutor::new(
            llm.clone(),
            tool_map,
            config.llm.max_tokens,
            config.llm.temperature,
        );

        let commands = Arc::new(CommandHandler::new(
            auth.clone(),
            context.clone(),
            scheduler.clone(),
            memory.clone(),
            pause.clone(),
            bus.clone(),
        ));
        let handler = Arc::new(MessageHandler::new(
            auth,
            context,
            executor,
            commands,
            bus.clone(),
            tools.clone(),
            memory,
            llm,
            PipelineSettings {
                max_context_tokens: config.llm.max_context_tokens,
                summarize_threshold: config.context.summarize_threshold,
                request_timeout_secs: config.llm.request_timeout_secs,
                dry_run,
            },
        ));

        // Pipeline: every incoming message, user-sent or synthetic.
        bus.subscribe(EventKind::MessageIncoming, "pipeline", move |event| {
            let handler = handler.clone();
            async move {
                if let Event::MessageIncoming(msg) = event {
                    handler.handle(msg).await;
                }
            }
        });

        // Scheduler firings whose action names a channel become synthetic
        // turns; anything else is just logged.
        let inject_bus = bus.clone();
        bus.subscribe(EventKind::SchedulerTrigger, "job-runner", move |event| {
            let bus = inject_bus.clone();
            async move {
                let Event::SchedulerTrigger {
                    job_name, action, ..
                } = &event
                else {
                    return;
                };
                info!(job = %job_name, action = %action, "scheduled job fired");
                if let Some((target, prompt)) = action.split_once(' ')
                    && let Some(target) = ChannelTarget::parse(target)
                    && !prompt.trim().is_empty()
                {
                    bus.publish(Event::MessageIncoming(IncomingMessage::text(
                        target.platform,
                        target.channel,
                        SCHEDULER_USER_ID,
                        prompt.trim(),
                    )));
                }
            }
        });

        // Delivery seam: chat transports subscribe to MessageOutgoing the
        // same way. Without one configured, replies land in the log.
        bus.subscribe(EventKind::MessageOutgoing, "delivery-log", |event| async move {
            if let Event::MessageOutgoing(msg) = event {
                info!(
                    platform = %msg.platform,
                    channel = %msg.channel,
                    chars = msg.content.len(),
                    "outgoing message"
                );
            }
        });

        let webhook_server = if config.webhooks.enabled {
            register_ingestor(&bus, &pause);
            Some(WebhookServer::new(config.webhooks.clone(), bus.clone()))
        } else {
            None
        };

        Ok(Self {
            bus,
            scheduler,
            scheduler_enabled: config.scheduler.enabled,
            webhook_server,
            tools,
        })
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(server) = &mut self.webhook_server {
            server.start().await?;
        }
        if self.scheduler_enabled {
            self.scheduler.start();
        }
        self.bus.start().await;
        info!("shannon ready");
        Ok(())
    }

    /// Shutdown order: ingress first (webhooks), then the scheduler, then
    /// drain the bus, then release tool resources.
    async fn stop(&mut self) {
        info!("shannon stopping");
        if let Some(server) = &mut self.webhook_server {
            server.stop().await;
        }
        if self.scheduler_enabled {
            self.scheduler.stop();
        }
        self.bus.stop(BUS_DRAIN_DEADLINE).await;
        for tool in &self.tools {
            if let Err(e) = tool.cleanup().await {
                warn!(tool = tool.name(), error = %e, "tool cleanup failed");
            }
        }
        info!("shannon stopped");
    }
}

pub async fn run(config: ShannonConfig, dry_run: bool) -> Result<()> {
    let mut app = Shannon::build(config, dry_run)?;
    app.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for shutdown signal");
    }
    info!("shutdown signal received");

    app.stop().await;
    Ok(())
}
