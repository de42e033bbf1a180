//! Turns validated webhook events into synthetic user turns.
//!
//! The subscriber formats the event through the endpoint's prompt
//! template and injects it into the pipeline as a message from the
//! reserved webhook user (granted operator level by the composition
//! root). While the agent is paused the event is queued instead; the
//! pause manager re-publishes it on resume.

use tracing::warn;

use shannon_core::{Event, EventBus, EventKind, IncomingMessage, ChannelTarget, WebhookEvent};
use shannon_runtime::PauseManager;

/// Reserved sender id for webhook-derived turns.
pub const WEBHOOK_USER_ID: &str = "webhook";

/// Render a prompt template, substituting `{source}`, `{event_type}`, and
/// `{summary}`. An empty template falls back to the summary.
pub fn format_prompt(template: &str, event: &WebhookEvent) -> String {
    if template.is_empty() {
        return event.summary.clone();
    }
    template
        .replace("{source}", &event.source)
        .replace("{event_type}", &event.event_type)
        .replace("{summary}", &event.summary)
}

/// Subscribe the ingestor on the bus. Call before `bus.start()`.
pub fn register_ingestor(bus: &EventBus, pause: &PauseManager) {
    let publish_bus = bus.clone();
    let pause = pause.clone();
    bus.subscribe(EventKind::WebhookReceived, "webhook-ingestor", move |event| {
        let bus = publish_bus.clone();
        let pause = pause.clone();
        async move {
            let Event::WebhookReceived {
                event: webhook,
                prompt_template,
            } = &event
            else {
                return;
            };

            if pause.is_paused() {
                pause.queue_event(event.clone());
                return;
            }

            let Some(target) = ChannelTarget::parse(&webhook.channel_target) else {
                warn!(
                    channel = %webhook.channel_target,
                    "webhook event has an unusable channel target, dropping"
                );
                return;
            };

            let content = format_prompt(prompt_template, webhook);
            bus.publish(Event::MessageIncoming(IncomingMessage::text(
                target.platform,
                target.channel,
                WEBHOOK_USER_ID,
                content,
            )));
        }
    });
}
