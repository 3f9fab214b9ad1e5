//! Per-stream catch-up and tail loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::messaging::{Event, EventBus};
use crate::store::{Entry, StreamStore};
use crate::streams::{StreamId, StreamRegistry};

/// Reads one stream's history, then follows it.
///
/// Every entry goes into the registry and out as a
/// [`Event::MessageAppended`], in id order. Read errors are logged and
/// retried forever; only cancellation ends [`StreamReader::run`].
pub struct StreamReader {
    store: Arc<dyn StreamStore>,
    registry: Arc<StreamRegistry>,
    bus: Arc<EventBus>,
    retry_delay: Duration,
}

impl StreamReader {
    pub fn new(
        store: Arc<dyn StreamStore>,
        registry: Arc<StreamRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn run(&self, stream: &str, cancel: CancellationToken) {
        let Some(mut cursor) = self.catch_up(stream, &cancel).await else {
            return;
        };
        debug!(stream = %stream, cursor = %cursor, "Catch-up done, tailing");

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = self.store.tail(stream, cursor) => read,
            };

            match read {
                Ok(entries) => cursor = self.apply(stream, cursor, entries),
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Tail read failed, retrying");
                    if !self.pause(&cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Load the existing history. Returns the last id read, or `None` if
    /// cancelled first.
    async fn catch_up(&self, stream: &str, cancel: &CancellationToken) -> Option<StreamId> {
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return None,
                read = self.store.range(stream) => read,
            };

            match read {
                Ok(entries) => return Some(self.apply(stream, StreamId::ZERO, entries)),
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Range read failed, retrying");
                    if !self.pause(cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Store and announce entries newer than `cursor`. Returns the new
    /// cursor.
    fn apply(&self, stream: &str, mut cursor: StreamId, entries: Vec<Entry>) -> StreamId {
        for entry in entries {
            if entry.id <= cursor {
                continue;
            }
            cursor = entry.id;

            match self.registry.append_message(stream, entry.id, entry.fields) {
                Some((snapshot, message)) => {
                    self.bus.publish(Event::message_appended(snapshot, message));
                }
                None => warn!(stream = %stream, id = %entry.id, "Entry for unregistered stream"),
            }
        }
        cursor
    }

    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }
}
