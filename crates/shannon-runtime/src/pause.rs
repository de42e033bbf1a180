//! Pause/resume manager for autonomous behaviors.
//!
//! While paused, scheduler firings are skipped and webhook-derived turns
//! are queued; direct messages keep flowing. Resuming (manually or via the
//! auto-resume timer) re-publishes queued events on the bus so missed work
//! surfaces as follow-up messages.

use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use shannon_core::{Event, EventBus};

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").expect("valid regex")
});

/// Parse a duration like "2h", "30m", "1h30m15s" into seconds. At least one
/// group must be present.
pub fn parse_duration(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let caps = DURATION_RE.captures(text)?;
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return None;
    }
    let group = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(group(1) * 3600 + group(2) * 60 + group(3))
}

struct PauseInner {
    bus: EventBus,
    paused: Mutex<bool>,
    queue: Mutex<Vec<Event>>,
    resume_task: Mutex<Option<JoinHandle<()>>>,
}

/// Binary paused state with an event queue and an optional auto-resume
/// timer. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct PauseManager {
    inner: Arc<PauseInner>,
}

impl PauseManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(PauseInner {
                bus,
                paused: Mutex::new(false),
                queue: Mutex::new(Vec::new()),
                resume_task: Mutex::new(None),
            }),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Pause autonomous behaviors, optionally scheduling an auto-resume.
    /// Pausing again replaces any pending auto-resume timer.
    pub fn pause(&self, duration: Option<Duration>) {
        *self.inner.paused.lock() = true;
        info!(duration_secs = duration.map(|d| d.as_secs()), "paused");

        let mut task = self.inner.resume_task.lock();
        if let Some(old) = task.take() {
            old.abort();
        }
        if let Some(duration) = duration {
            let manager = self.clone();
            *task = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let count = manager.resume_and_flush();
                info!(queued = count, "auto-resumed");
            }));
        }
    }

    /// Resume, cancel any auto-resume timer, and return the number of
    /// events that were queued while paused. Does not drain the queue.
    pub fn resume(&self) -> usize {
        if let Some(task) = self.inner.resume_task.lock().take() {
            task.abort();
        }
        *self.inner.paused.lock() = false;
        let count = self.inner.queue.lock().len();
        info!(queued = count, "resumed");
        count
    }

    /// Resume and re-publish every queued event on the bus. Returns the
    /// count of flushed events.
    pub fn resume_and_flush(&self) -> usize {
        let count = self.resume();
        for event in self.drain_queue() {
            self.inner.bus.publish(event);
        }
        count
    }

    /// Append an event to the pause queue.
    pub fn queue_event(&self, event: Event) {
        self.inner.queue.lock().push(event);
    }

    /// Return and clear the queued events.
    pub fn drain_queue(&self) -> Vec<Event> {
        std::mem::take(&mut *self.inner.queue.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shannon_core::IncomingMessage;

    // ── Duration parsing ───────────────────────────────────────

    #[test]
    fn test_duration_hours() {
        assert_eq!(parse_duration("2h"), Some(7200));
    }

    #[test]
    fn test_duration_minutes() {
        assert_eq!(parse_duration("30m"), Some(1800));
    }

    #[test]
    fn test_duration_seconds() {
        assert_eq!(parse_duration("45s"), Some(45));
    }

    #[test]
    fn test_duration_combined() {
        assert_eq!(parse_duration("1h30m"), Some(5400));
        assert_eq!(parse_duration("1h30m15s"), Some(5415));
    }

    #[test]
    fn test_duration_invalid() {
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("12"), None);
    }

    #[test]
    fn test_duration_zero() {
        assert_eq!(parse_duration("0m"), Some(0));
    }

    // ── Pause manager ──────────────────────────────────────────

    fn event() -> Event {
        Event::MessageIncoming(IncomingMessage::text("discord", "ch", "u", "hi"))
    }

    #[tokio::test]
    async fn test_pause_is_idempotent() {
        let pm = PauseManager::new(EventBus::default());
        assert!(!pm.is_paused());
        pm.pause(None);
        pm.pause(None);
        assert!(pm.is_paused());
    }

    #[tokio::test]
    async fn test_resume_reports_and_drains_once() {
        let pm = PauseManager::new(EventBus::default());
        pm.pause(None);
        pm.queue_event(event());
        pm.queue_event(event());

        assert_eq!(pm.resume(), 2);
        assert!(!pm.is_paused());
        assert_eq!(pm.drain_queue().len(), 2);
        // Second drain yields nothing.
        assert!(pm.drain_queue().is_empty());
    }

    #[tokio::test]
    async fn test_auto_resume_flushes_queue() {
        let bus = EventBus::default();
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        bus.subscribe(shannon_core::EventKind::MessageIncoming, "sink", move |e| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(e).await;
            }
        });
        bus.start().await;

        let pm = PauseManager::new(bus.clone());
        pm.pause(Some(Duration::from_millis(50)));
        pm.queue_event(event());
        assert!(pm.is_paused());

        let flushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("auto-resume should flush the queue");
        assert!(flushed.is_some());
        assert!(!pm.is_paused());
        assert_eq!(pm.queued_count(), 0);

        bus.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_manual_resume_cancels_timer() {
        let pm = PauseManager::new(EventBus::default());
        pm.pause(Some(Duration::from_secs(3600)));
        assert_eq!(pm.resume(), 0);
        assert!(!pm.is_paused());
        // The aborted timer must not resume anything later.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pm.is_paused());
    }
}
