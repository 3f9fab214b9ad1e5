//! Discovery from the store's command trace.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::Discovery;
use crate::store::{CommandTap, StoreError, StreamStore};

/// Stream append command.
pub const APPEND_VERB: &str = "XADD";

/// Token position of the command name in a trace line.
///
/// A trace line reads `<unix time> [<db> <client addr>] "CMD" "arg" ...`,
/// so after splitting the command sits at index 3 and its first argument
/// at index 4.
const VERB_INDEX: usize = 3;

/// Stream name appended to by a traced command, if it is an append.
pub fn parse_append_command(line: &str) -> Option<String> {
    let unquoted = line.replace('"', "");
    let mut tokens = unquoted.split_whitespace().skip(VERB_INDEX);
    let verb = tokens.next()?;
    if !verb.eq_ignore_ascii_case(APPEND_VERB) {
        return None;
    }
    tokens.next().map(str::to_string)
}

/// Watches traced commands for stream appends.
///
/// The tap is opened lazily and reopened after any read error.
pub struct CommandTapDiscovery {
    store: Arc<dyn StreamStore>,
    tap: Option<Box<dyn CommandTap>>,
}

impl CommandTapDiscovery {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self { store, tap: None }
    }
}

#[async_trait]
impl Discovery for CommandTapDiscovery {
    async fn next_batch(&mut self) -> Result<Vec<String>, StoreError> {
        let tap = match self.tap.as_mut() {
            Some(tap) => tap,
            None => self.tap.insert(self.store.open_tap().await?),
        };

        match tap.next_line().await {
            Ok(line) => {
                trace!(line = %line, "Traced command");
                Ok(parse_append_command(&line).into_iter().collect())
            }
            Err(e) => {
                self.tap = None;
                Err(e)
            }
        }
    }
}
