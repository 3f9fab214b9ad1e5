//! Event bus connecting the engine to its observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use super::{Event, EventKind};
use crate::listener::ListenerSummary;
use crate::streams::{Message, Stream};

/// Capacity of the broadcast hand-off used by [`EventBus::subscribe_channel`].
const CHANNEL_CAPACITY: usize = 1024;

/// Callback invoked synchronously for each published event of its kind.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Typed publish/subscribe hub.
///
/// Handlers run on the publisher's task, in registration order, and must
/// not block. Observers that need their own pace should use
/// [`EventBus::subscribe_channel`] instead. Nothing is replayed to late
/// subscribers.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create a bus whose channel subscribers buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn on_stream_discovered<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::StreamDiscovered, move |event| {
            if let Event::StreamDiscovered { stream } = event {
                handler(stream);
            }
        })
    }

    pub fn on_message_appended<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream, &Message) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MessageAppended, move |event| {
            if let Event::MessageAppended { stream, message } = event {
                handler(stream, message);
            }
        })
    }

    pub fn on_listener_discovered<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ListenerSummary) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ListenerDiscovered, move |event| {
            if let Event::ListenerDiscovered { listener } = event {
                handler(listener);
            }
        })
    }

    pub fn on_listener_status_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ListenerSummary, &str) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ListenerStatusChanged, move |event| {
            if let Event::ListenerStatusChanged {
                listener,
                last_output,
            } = event
            {
                handler(listener, last_output);
            }
        })
    }

    /// Deliver an event to every handler of its kind, then to channel
    /// subscribers.
    pub fn publish(&self, event: Event) {
        // Handlers are called without the lock held so they may (un)subscribe.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(&event);
        }

        // No channel subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Receive every event through a buffered channel.
    pub fn subscribe_channel(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel end returned by [`EventBus::subscribe_channel`].
pub struct EventReceiver {
    rx: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<Event, BusError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => BusError::Lagged(n),
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Event>, BusError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel closed")]
    Closed,
    #[error("Lagged behind by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::StreamListener;
    use crate::streams::{Fields, StreamId};
    use std::sync::Mutex;

    fn stream(name: &str) -> Stream {
        Stream {
            name: name.to_string(),
            message_count: 0,
            last_id: None,
        }
    }

    fn discovered(name: &str) -> Event {
        Event::stream_discovered(stream(name))
    }

    // =========================================================================
    // Handler dispatch
    // =========================================================================

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(EventKind::StreamDiscovered, move |_| {
                log.lock().unwrap().push(tag);
            });
        }

        bus.publish(discovered("orders"));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handlers_only_see_their_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        bus.on_message_appended(move |stream, message| {
            s.lock()
                .unwrap()
                .push(format!("{}:{}", stream.name, message.id));
        });

        bus.publish(discovered("orders"));
        bus.publish(Event::message_appended(
            stream("orders"),
            Message::new(StreamId::new(3, 1), Fields::new()),
        ));

        assert_eq!(*seen.lock().unwrap(), vec!["orders:3-1"]);
    }

    #[test]
    fn test_every_emission_reaches_every_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.on_stream_discovered(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(discovered("a"));
        bus.publish(discovered("b"));
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(discovered("early"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on_stream_discovered(move |stream| s.lock().unwrap().push(stream.name.clone()));

        bus.publish(discovered("late"));
        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = bus.on_stream_discovered(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.handler_count(EventKind::StreamDiscovered), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count(EventKind::StreamDiscovered), 0);

        bus.publish(discovered("orders"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_subscribe_while_dispatching() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.on_stream_discovered(move |_| {
            inner.on_stream_discovered(|_| {});
        });

        bus.publish(discovered("orders"));
        assert_eq!(bus.handler_count(EventKind::StreamDiscovered), 2);
    }

    #[test]
    fn test_typed_listener_helpers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        bus.on_listener_discovered(move |l| s.lock().unwrap().push(format!("new {}", l.name)));
        let s = Arc::clone(&seen);
        bus.on_listener_status_changed(move |l, line| {
            s.lock()
                .unwrap()
                .push(format!("{} {} {}", l.name, l.status, line))
        });

        let listener = StreamListener::new("orders").summary();
        bus.publish(Event::listener_discovered(listener.clone()));
        bus.publish(Event::listener_status_changed(listener, "boom"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["new orders".to_string(), "orders OK boom".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        bus.on_stream_discovered(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    for j in 0..25 {
                        bus.publish(discovered(&format!("s{}-{}", i, j)));
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 200);
    }

    // =========================================================================
    // Channel hand-off
    // =========================================================================

    #[test]
    fn test_channel_receives_all_kinds_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();

        bus.publish(discovered("orders"));
        bus.publish(Event::listener_discovered(StreamListener::new("orders").summary()));

        assert_eq!(
            rx.try_recv().unwrap().unwrap().kind(),
            EventKind::StreamDiscovered
        );
        assert_eq!(
            rx.try_recv().unwrap().unwrap().kind(),
            EventKind::ListenerDiscovered
        );
        assert!(rx.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_publish_without_channel_subscribers() {
        let bus = EventBus::new();
        bus.publish(discovered("orders"));
    }

    #[tokio::test]
    async fn test_channel_closed_when_bus_dropped() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();
        drop(bus);

        assert!(matches!(rx.recv().await, Err(BusError::Closed)));
    }

    #[test]
    fn test_channel_lag_reported() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe_channel();
        for i in 0..5 {
            bus.publish(discovered(&format!("s{}", i)));
        }

        match rx.try_recv() {
            Err(BusError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {:?}", other.map(|e| e.map(|e| e.kind()))),
        }
    }

    #[test]
    fn test_bus_error_display() {
        assert_eq!(BusError::Closed.to_string(), "Channel closed");
        assert_eq!(BusError::Lagged(42).to_string(), "Lagged behind by 42 events");
    }
}
