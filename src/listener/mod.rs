//! Supervision of external stream listeners.
//!
//! When a consumer runner (an artisan-style `streamer:listen` command) is
//! available, every discovered stream gets one runner process. Its stdout
//! is parsed for the two lines that matter:
//!
//! - `There are no local listeners associated with <stream> event in configuration.`
//!   stops supervision of that stream for good;
//! - `Listener error. Failed processing message` marks it as `WARNING`.
//!
//! Exit code 1 marks the stream `ERROR` and restarts the runner from the
//! last message the registry holds, with bounded backoff. Any other exit
//! ends supervision.

mod output;
mod runner;
mod status;
mod supervisor;

pub use output::LineReader;
pub use runner::{ListenArgs, RunnerCommand, RunnerError, LISTEN_VERB, PROBE_ARGS};
pub use status::{ListenerStatus, ListenerSummary, StreamListener, FAILED_PROCESSING_MARKER};
pub use supervisor::{
    ListenerSupervisor, RestartPolicy, SuperviseOutcome, MIN_RESTART_DELAY, RECOVERABLE_EXIT_CODE,
};
