//! Streams and their messages.
//!
//! A [`Stream`] is a named, append-only sequence of [`Message`]s assigned
//! ids by the store. The [`StreamRegistry`] owns everything discovered so
//! far; the rest of the crate sees streams through value snapshots.

mod id;
mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use id::{InvalidStreamId, StreamId};
pub use registry::StreamRegistry;

/// Field map of a single stream entry.
pub type Fields = BTreeMap<String, String>;

/// A single stream entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: StreamId,
    pub fields: Fields,
}

impl Message {
    pub fn new(id: StreamId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Human readable dump of the fields, one `name: value` line each.
    ///
    /// Values holding a JSON object or array are pretty-printed.
    pub fn render_content(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&pretty_value(value));
            out.push('\n');
        }
        out
    }
}

fn pretty_value(value: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| value.to_string())
        }
        _ => value.to_string(),
    }
}

/// Point-in-time view of a registered stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub message_count: usize,
    pub last_id: Option<StreamId>,
}
