//! Event types published by the engine.

use serde::{Deserialize, Serialize};

use crate::listener::ListenerSummary;
use crate::streams::{Message, Stream};

/// Discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StreamDiscovered,
    MessageAppended,
    ListenerDiscovered,
    ListenerStatusChanged,
}

/// Everything an observer can learn about the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A stream name was seen for the first time.
    StreamDiscovered { stream: Stream },
    /// A reader stored a message. `stream` reflects the count after the append.
    MessageAppended { stream: Stream, message: Message },
    /// The supervisor started managing a stream.
    ListenerDiscovered { listener: ListenerSummary },
    /// A supervised listener changed status.
    ListenerStatusChanged {
        listener: ListenerSummary,
        last_output: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StreamDiscovered { .. } => EventKind::StreamDiscovered,
            Event::MessageAppended { .. } => EventKind::MessageAppended,
            Event::ListenerDiscovered { .. } => EventKind::ListenerDiscovered,
            Event::ListenerStatusChanged { .. } => EventKind::ListenerStatusChanged,
        }
    }

    /// Name of the stream the event is about.
    pub fn stream_name(&self) -> &str {
        match self {
            Event::StreamDiscovered { stream } | Event::MessageAppended { stream, .. } => {
                &stream.name
            }
            Event::ListenerDiscovered { listener }
            | Event::ListenerStatusChanged { listener, .. } => &listener.name,
        }
    }

    pub fn stream_discovered(stream: Stream) -> Self {
        Event::StreamDiscovered { stream }
    }

    pub fn message_appended(stream: Stream, message: Message) -> Self {
        Event::MessageAppended { stream, message }
    }

    pub fn listener_discovered(listener: ListenerSummary) -> Self {
        Event::ListenerDiscovered { listener }
    }

    pub fn listener_status_changed(
        listener: ListenerSummary,
        last_output: impl Into<String>,
    ) -> Self {
        Event::ListenerStatusChanged {
            listener,
            last_output: last_output.into(),
        }
    }
}
