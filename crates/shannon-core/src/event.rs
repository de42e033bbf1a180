use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::message::{IncomingMessage, OutgoingMessage};
use crate::types::WebhookEvent;

/// Events flowing through the system, the central nervous system of Shannon.
#[derive(Debug, Clone)]
pub enum Event {
    /// A transport received a message.
    MessageIncoming(IncomingMessage),
    /// The pipeline produced a reply for a transport to deliver.
    MessageOutgoing(OutgoingMessage),
    /// A scheduled job fired.
    SchedulerTrigger {
        job_id: i64,
        job_name: String,
        action: String,
    },
    /// A validated webhook arrived and was normalized.
    WebhookReceived {
        event: WebhookEvent,
        prompt_template: String,
    },
}

/// Type tag used for subscription matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageIncoming,
    MessageOutgoing,
    SchedulerTrigger,
    WebhookReceived,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MessageIncoming(_) => EventKind::MessageIncoming,
            Event::MessageOutgoing(_) => EventKind::MessageOutgoing,
            Event::SchedulerTrigger { .. } => EventKind::SchedulerTrigger,
            Event::WebhookReceived { .. } => EventKind::WebhookReceived,
        }
    }
}

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    kind: EventKind,
    name: String,
    tx: mpsc::Sender<Event>,
}

struct Worker {
    name: String,
    handler: Handler,
    rx: mpsc::Receiver<Event>,
}

struct BusInner {
    capacity: usize,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Workers waiting to be spawned by `start`.
    pending: Mutex<Vec<Worker>>,
    running: Mutex<Vec<JoinHandle<()>>>,
}

/// In-process typed publish/subscribe.
///
/// Each subscriber owns a bounded queue drained by a dedicated serial
/// worker, so delivery order is preserved per subscriber. Publishing never
/// blocks: on queue overflow the event is dropped with a warning, so
/// subscribers must be fast or spawn their own work.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity,
                subscriptions: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                running: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler for one event kind. Must be called before
    /// `start`; the worker is spawned there.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, name: &str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscriptions.lock().push(Subscription {
            kind,
            name: name.to_string(),
            tx,
        });
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner.pending.lock().push(Worker {
            name: name.to_string(),
            handler,
            rx,
        });
    }

    /// Enqueue an event for every matching subscriber. Never blocks.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        for sub in self.inner.subscriptions.lock().iter() {
            if sub.kind != kind {
                continue;
            }
            if sub.tx.try_send(event.clone()).is_err() {
                warn!(subscriber = %sub.name, kind = ?kind, "event queue full, dropping event");
            }
        }
    }

    /// Spawn one serial worker per subscriber.
    pub async fn start(&self) {
        let workers = std::mem::take(&mut *self.inner.pending.lock());
        let mut running = self.inner.running.lock();
        for worker in workers {
            let Worker {
                name,
                handler,
                mut rx,
            } = worker;
            running.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    handler(event).await;
                }
                tracing::debug!(subscriber = %name, "bus worker exiting");
            }));
        }
    }

    /// Stop the bus, giving in-flight handlers until `deadline` to drain.
    pub async fn stop(&self, deadline: Duration) {
        // Dropping the senders closes each worker's queue; workers finish
        // whatever is already enqueued and then exit.
        self.inner.subscriptions.lock().clear();
        let handles = std::mem::take(&mut *self.inner.running.lock());
        for mut handle in handles {
            match tokio::time::timeout(deadline, &mut handle).await {
                Ok(Err(e)) if !e.is_cancelled() => error!(error = %e, "bus worker panicked"),
                Err(_) => {
                    warn!("bus worker did not drain before deadline, aborting");
                    handle.abort();
                }
                _ => {}
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
