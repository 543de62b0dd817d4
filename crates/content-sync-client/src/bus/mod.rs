mod memory;

pub use memory::MemoryTransport;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use content_sync_core::{SignalEnvelope, SignalTopic, SignalTransport, StoreError, SyncSignal};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Handle returned by [`ChangePropagationBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type SignalHandler = Arc<dyn Fn(&SyncSignal) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    topics: Vec<SignalTopic>,
    handler: SignalHandler,
}

impl Subscription {
    fn wants(&self, signal: &SyncSignal) -> bool {
        self.topics.iter().any(|t| t.matches(signal.resource_type))
    }
}

/// Publish/subscribe hub for change signals.
///
/// Local subscribers are invoked synchronously, in publish order, before
/// `publish` returns. When a transport is attached, signals also travel to
/// other contexts, which re-dispatch them to their own subscribers only.
pub struct ChangePropagationBus {
    context_id: String,
    subscribers: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    transport: Mutex<Option<Arc<dyn SignalTransport>>>,
    listener: Mutex<Option<AbortHandle>>,
}

impl ChangePropagationBus {
    pub fn new() -> Self {
        Self::with_context_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_context_id(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            transport: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscription>> {
        // A handler panic never happens under this lock
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` for the given topics.
    pub fn subscribe<I, F>(&self, topics: I, handler: F) -> SubscriptionId
    where
        I: IntoIterator<Item = SignalTopic>,
        F: Fn(&SyncSignal) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers().push(Subscription {
            id,
            topics: topics.into_iter().collect(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Invoke every local subscriber interested in `signal`.
    fn dispatch_local(&self, signal: &SyncSignal) -> usize {
        // Clone handlers out so they can subscribe or unsubscribe re-entrantly
        let handlers: Vec<SignalHandler> = self
            .subscribers()
            .iter()
            .filter(|s| s.wants(signal))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(signal))).is_err() {
                warn!(
                    "Signal handler panicked on {} {:?} {}",
                    signal.resource_type, signal.action, signal.item_id
                );
            }
        }
        handlers.len()
    }

    /// Deliver `signal` to local subscribers, then to other contexts.
    ///
    /// Transport failures are logged, never returned.
    pub async fn publish(&self, signal: SyncSignal) {
        let delivered = self.dispatch_local(&signal);
        debug!(
            "Dispatched {} {:?} {} to {} local subscribers",
            signal.resource_type, signal.action, signal.item_id, delivered
        );

        let transport = self
            .transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(transport) = transport {
            let envelope = SignalEnvelope::new(self.context_id.clone(), signal);
            if let Err(e) = transport.broadcast(&envelope).await {
                warn!(
                    "Failed to broadcast signal over {}: {}",
                    transport.transport_name(),
                    e
                );
            }
        }
    }

    /// Connect this bus to other contexts through `transport`.
    ///
    /// Envelopes from other contexts are re-dispatched locally; this
    /// context's own envelopes are dropped. The returned task ends when the
    /// bus is dropped, the transport closes, or another transport is attached.
    pub fn attach(
        self: &Arc<Self>,
        transport: Arc<dyn SignalTransport>,
    ) -> Result<JoinHandle<()>, StoreError> {
        let mut rx = transport.listen()?;
        let name = transport.transport_name();
        *self.transport.lock().unwrap_or_else(|e| e.into_inner()) = Some(transport);

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                if envelope.context_id == bus.context_id {
                    continue;
                }
                let delivered = bus.dispatch_local(&envelope.signal);
                debug!(
                    "Re-dispatched signal from context {} to {} subscribers",
                    envelope.context_id, delivered
                );
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
            debug!("Bus {} stopped its previous listener", self.context_id);
        }

        info!("Bus {} attached to {} transport", self.context_id, name);
        Ok(handle)
    }
}

impl Default for ChangePropagationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_sync_core::{ResourceType, SignalOrigin, SyncAction};
    use content_sync_local::MarkerFileTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn signal(resource: ResourceType, id: &str) -> SyncSignal {
        SyncSignal::new(resource, SyncAction::Update, id, SignalOrigin::Remote)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&SyncSignal) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |s: &SyncSignal| sink.lock().unwrap().push(s.item_id.clone()))
    }

    #[tokio::test]
    async fn test_local_delivery_by_topic() {
        let bus = ChangePropagationBus::new();
        let (events, on_event) = recorder();
        let (all, on_all) = recorder();
        let (articles, on_article) = recorder();

        bus.subscribe([SignalTopic::Resource(ResourceType::Event)], on_event);
        bus.subscribe([SignalTopic::All], on_all);
        bus.subscribe([SignalTopic::from(ResourceType::Article)], on_article);

        bus.publish(signal(ResourceType::Event, "1")).await;
        bus.publish(signal(ResourceType::Event, "2")).await;

        assert_eq!(*events.lock().unwrap(), vec!["1", "2"]);
        assert_eq!(*all.lock().unwrap(), vec!["1", "2"]);
        assert!(articles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = ChangePropagationBus::new();
        let (seen, handler) = recorder();
        let id = bus.subscribe([SignalTopic::All], handler);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(signal(ResourceType::Recording, "5")).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_block_others() {
        let bus = ChangePropagationBus::new();
        bus.subscribe([SignalTopic::All], |_s: &SyncSignal| panic!("handler bug"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe([SignalTopic::All], move |_s: &SyncSignal| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(signal(ResourceType::Article, "1")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_may_subscribe_reentrantly() {
        let bus = Arc::new(ChangePropagationBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe([SignalTopic::All], move |_s: &SyncSignal| {
            inner.subscribe([SignalTopic::All], |_s: &SyncSignal| {});
        });

        bus.publish(signal(ResourceType::Article, "1")).await;
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_cross_context_delivery() {
        let transport = MemoryTransport::new();
        let publisher = Arc::new(ChangePropagationBus::with_context_id("tab-a"));
        let observer = Arc::new(ChangePropagationBus::with_context_id("tab-b"));
        publisher.attach(Arc::new(transport.clone())).unwrap();
        observer.attach(Arc::new(transport.clone())).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = tx.clone();
        observer.subscribe([SignalTopic::from(ResourceType::Event)], move |s: &SyncSignal| {
            let _ = event_tx.send(("event", s.clone()));
        });
        observer.subscribe([SignalTopic::All], move |s: &SyncSignal| {
            let _ = tx.send(("all", s.clone()));
        });

        let (own, own_handler) = recorder();
        publisher.subscribe([SignalTopic::All], own_handler);

        publisher
            .publish(SyncSignal::new(
                ResourceType::Event,
                SyncAction::Update,
                "42",
                SignalOrigin::Remote,
            ))
            .await;

        let mut labels = Vec::new();
        for _ in 0..2 {
            let (label, received) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.resource_type, ResourceType::Event);
            assert_eq!(received.action, SyncAction::Update);
            assert_eq!(received.item_id, "42");
            labels.push(label);
        }
        labels.sort();
        assert_eq!(labels, vec!["all", "event"]);

        // Publisher saw its own signal exactly once: locally, not echoed back
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*own.lock().unwrap(), vec!["42"]);
    }

    #[tokio::test]
    async fn test_reattach_replaces_listener() {
        let transport = MemoryTransport::new();
        let publisher = Arc::new(ChangePropagationBus::with_context_id("tab-a"));
        let observer = Arc::new(ChangePropagationBus::with_context_id("tab-b"));
        publisher.attach(Arc::new(transport.clone())).unwrap();
        let first = observer.attach(Arc::new(transport.clone())).unwrap();
        observer.attach(Arc::new(transport.clone())).unwrap();

        assert!(first.await.unwrap_err().is_cancelled());

        let (seen, handler) = recorder();
        observer.subscribe([SignalTopic::All], handler);
        publisher.publish(signal(ResourceType::Article, "7")).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["7"]);
    }

    #[tokio::test]
    async fn test_cross_context_delivery_over_marker_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let marker = temp_dir.path().join("sync-signal.json");
        let publisher = Arc::new(ChangePropagationBus::with_context_id("cli"));
        let observer = Arc::new(ChangePropagationBus::with_context_id("editor"));
        publisher
            .attach(Arc::new(MarkerFileTransport::new(&marker)))
            .unwrap();
        observer
            .attach(Arc::new(MarkerFileTransport::new(&marker)))
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        observer.subscribe([SignalTopic::from(ResourceType::Event)], move |s: &SyncSignal| {
            let _ = tx.send(s.clone());
        });
        let (own, own_handler) = recorder();
        publisher.subscribe([SignalTopic::All], own_handler);

        // Give the watchers time to register
        tokio::time::sleep(Duration::from_millis(100)).await;

        publisher
            .publish(SyncSignal::new(
                ResourceType::Event,
                SyncAction::Update,
                "42",
                SignalOrigin::Fallback,
            ))
            .await;

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no signal within timeout")
            .expect("observer closed");
        assert_eq!(received.resource_type, ResourceType::Event);
        assert_eq!(received.action, SyncAction::Update);
        assert_eq!(received.item_id, "42");
        assert_eq!(received.origin, SignalOrigin::Fallback);

        // The marker watcher also fires in the publishing context
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*own.lock().unwrap(), vec!["42"]);
    }
}
