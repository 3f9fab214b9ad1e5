//! Per-stream listener state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Substring the runner prints when a listener throws on a message.
pub const FAILED_PROCESSING_MARKER: &str = "Listener error. Failed processing message";

const OUTPUT_TIME_FORMAT: &str = "%m-%d-%Y %H:%M:%S";

/// Health of a supervised listener process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerStatus {
    #[default]
    Ok,
    Warning,
    Error,
    Stopped,
}

impl ListenerStatus {
    /// Stopped listeners are never restarted.
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerStatus::Stopped)
    }
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerStatus::Ok => "OK",
            ListenerStatus::Warning => "WARNING",
            ListenerStatus::Error => "ERROR",
            ListenerStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// The supervisor's record for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamListener {
    pub name: String,
    pub status: ListenerStatus,
    /// Timestamped runner output, oldest first.
    pub output: Vec<String>,
    /// Times the runner was restarted after a recoverable exit.
    pub restarts: u32,
}

impl StreamListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ListenerStatus::Ok,
            output: Vec::new(),
            restarts: 0,
        }
    }

    /// Append a line to the output log, prefixed with the local time.
    /// Returns the stored line.
    pub fn push_output(&mut self, text: &str) -> String {
        let line = format!(
            "{}: {}",
            chrono::Local::now().format(OUTPUT_TIME_FORMAT),
            text
        );
        self.output.push(line.clone());
        line
    }

    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }

    /// Whether `line` is the runner's "nothing to run for this stream" notice.
    pub fn has_no_listeners(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\n', '\r']);
        line == format!(
            "There are no local listeners associated with {} event in configuration.",
            self.name
        )
    }

    pub fn is_failing(line: &str) -> bool {
        line.contains(FAILED_PROCESSING_MARKER)
    }

    pub fn summary(&self) -> ListenerSummary {
        ListenerSummary {
            name: self.name.clone(),
            status: self.status,
            restarts: self.restarts,
            output_lines: self.output.len(),
        }
    }
}

/// Fixed-size view of a [`StreamListener`] carried by events.
///
/// The output log itself stays with the supervisor; read it through
/// `ListenerSupervisor::listener`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSummary {
    pub name: String,
    pub status: ListenerStatus,
    pub restarts: u32,
    /// Length of the output log when the summary was taken.
    pub output_lines: usize,
}
