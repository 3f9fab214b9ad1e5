//! In-memory registry of discovered streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Fields, Message, Stream, StreamId};

#[derive(Debug, Default)]
struct StreamLog {
    messages: BTreeMap<StreamId, Message>,
}

impl StreamLog {
    fn snapshot(&self, name: &str) -> Stream {
        Stream {
            name: name.to_string(),
            message_count: self.messages.len(),
            last_id: self.messages.keys().next_back().copied(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<String, StreamLog>,
    /// Names in discovery order.
    order: Vec<String>,
}

/// Name-keyed collection of every stream seen so far.
///
/// Streams are never removed and a stream's messages only grow. All access
/// is serialised through a single lock, so the registry can be shared
/// between the discovery monitor, readers and event handlers.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    inner: RwLock<Inner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a stream by name.
    ///
    /// Returns the stream and whether this call created it. Registering a
    /// known name changes nothing.
    pub fn register(&self, name: &str) -> (Stream, bool) {
        let mut inner = self.write();
        if let Some(log) = inner.streams.get(name) {
            return (log.snapshot(name), false);
        }

        let log = StreamLog::default();
        let stream = log.snapshot(name);
        inner.streams.insert(name.to_string(), log);
        inner.order.push(name.to_string());
        (stream, true)
    }

    /// Store a message under `stream`.
    ///
    /// A repeated id replaces the stored fields. Returns `None` when the
    /// stream was never registered.
    pub fn append_message(
        &self,
        stream: &str,
        id: StreamId,
        fields: Fields,
    ) -> Option<(Stream, Message)> {
        let mut inner = self.write();
        let log = inner.streams.get_mut(stream)?;
        let message = Message::new(id, fields);
        log.messages.insert(id, message.clone());
        Some((log.snapshot(stream), message))
    }

    pub fn find(&self, name: &str) -> Option<Stream> {
        self.read().streams.get(name).map(|log| log.snapshot(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().streams.contains_key(name)
    }

    /// Message ids of `stream` in store order.
    pub fn list_message_ids(&self, stream: &str) -> Option<Vec<StreamId>> {
        self.read()
            .streams
            .get(stream)
            .map(|log| log.messages.keys().copied().collect())
    }

    pub fn message_count(&self, stream: &str) -> Option<usize> {
        self.read().streams.get(stream).map(|log| log.messages.len())
    }

    /// Look up a message by its textual id. Unknown streams and ids that
    /// do not parse both come back as `None`.
    pub fn get_message(&self, stream: &str, id: &str) -> Option<Message> {
        let id: StreamId = id.parse().ok()?;
        self.read()
            .streams
            .get(stream)
            .and_then(|log| log.messages.get(&id).cloned())
    }

    pub fn last_message_id(&self, stream: &str) -> Option<StreamId> {
        self.read()
            .streams
            .get(stream)
            .and_then(|log| log.messages.keys().next_back().copied())
    }

    /// Registered stream names in discovery order.
    pub fn stream_names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
