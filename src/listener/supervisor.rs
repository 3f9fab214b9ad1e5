//! Supervision of one runner process per stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output::LineReader;
use super::runner::{ListenArgs, RunnerCommand};
use super::status::{ListenerStatus, StreamListener};
use crate::messaging::{Event, EventBus};
use crate::streams::{StreamId, StreamRegistry};

/// Exit code after which the runner is restarted.
pub const RECOVERABLE_EXIT_CODE: i32 = 1;

/// Lower bound for every restart delay.
pub const MIN_RESTART_DELAY: Duration = Duration::from_millis(10);

/// Delay between restarts of a failing runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RestartPolicy {
    /// First delay after a failure, never below [`MIN_RESTART_DELAY`].
    pub fn first_delay(&self) -> Duration {
        self.initial_delay.max(MIN_RESTART_DELAY)
    }

    /// Delay to use after `current`: doubled, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .max(MIN_RESTART_DELAY)
            .saturating_mul(2)
            .min(self.max_delay.max(MIN_RESTART_DELAY))
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Why [`ListenerSupervisor::supervise`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperviseOutcome {
    /// The runner reported no listeners for the stream.
    Stopped,
    /// The runner exited with a code that is not restarted.
    Exited(Option<i32>),
    Cancelled,
}

enum Pump {
    Eof,
    Stopped,
    Cancelled,
}

/// Runs and watches a consumer-runner process for each stream.
pub struct ListenerSupervisor {
    runner: RunnerCommand,
    registry: Arc<StreamRegistry>,
    bus: Arc<EventBus>,
    policy: RestartPolicy,
    group: Option<String>,
    consumer: Option<String>,
    listeners: Mutex<HashMap<String, StreamListener>>,
}

impl ListenerSupervisor {
    pub fn new(runner: RunnerCommand, registry: Arc<StreamRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            runner,
            registry,
            bus,
            policy: RestartPolicy::default(),
            group: None,
            consumer: None,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Probe the runner and build a supervisor only if it works.
    pub async fn detect(
        runner: RunnerCommand,
        registry: Arc<StreamRegistry>,
        bus: Arc<EventBus>,
    ) -> Option<Self> {
        match runner.probe().await {
            Ok(()) => {
                info!(program = %runner.program(), "Listener runner detected");
                Some(Self::new(runner, registry, bus))
            }
            Err(e) => {
                info!(program = %runner.program(), error = %e, "Listener runner not available");
                None
            }
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_consumer_group(mut self, group: Option<String>, consumer: Option<String>) -> Self {
        self.group = group;
        self.consumer = consumer;
        self
    }

    /// Full record for `name`, including its output log.
    pub fn listener(&self, name: &str) -> Option<StreamListener> {
        self.lock().get(name).cloned()
    }

    pub fn listener_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamListener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status of the record for `name`, announcing it if it is new.
    fn ensure_listener(&self, name: &str) -> ListenerStatus {
        let created = {
            let mut listeners = self.lock();
            match listeners.get(name) {
                Some(existing) => return existing.status,
                None => {
                    let listener = StreamListener::new(name);
                    let summary = listener.summary();
                    listeners.insert(name.to_string(), listener);
                    summary
                }
            }
        };

        let status = created.status;
        self.bus.publish(Event::listener_discovered(created));
        status
    }

    /// Apply `f` to the record and publish a status change if it returns one.
    fn update<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut StreamListener) -> Option<String>,
    {
        let changed = {
            let mut listeners = self.lock();
            let Some(listener) = listeners.get_mut(name) else {
                return;
            };
            f(listener).map(|line| (listener.summary(), line))
        };

        if let Some((listener, line)) = changed {
            debug!(stream = %name, status = %listener.status, "Listener status changed");
            self.bus
                .publish(Event::listener_status_changed(listener, line));
        }
    }

    /// Record one line of runner output. Returns true once the stream is
    /// stopped.
    fn handle_line(&self, name: &str, line: &str) -> bool {
        let mut stopped = false;
        self.update(name, |listener| {
            if listener.status.is_terminal() {
                stopped = true;
                return None;
            }

            let stored = listener.push_output(line);
            if listener.has_no_listeners(line) {
                listener.status = ListenerStatus::Stopped;
                stopped = true;
                Some(stored)
            } else if StreamListener::is_failing(line) {
                listener.status = ListenerStatus::Warning;
                Some(stored)
            } else {
                None
            }
        });
        stopped
    }

    /// Cursor for a restart: the last message the registry holds.
    fn resume_cursor(&self, stream: &str) -> StreamId {
        self.registry
            .last_message_id(stream)
            .unwrap_or(StreamId::ZERO)
    }

    /// Run and restart the runner for `stream` until it stops, exits for
    /// good, or `cancel` fires.
    pub async fn supervise(&self, stream: &str, cancel: CancellationToken) -> SuperviseOutcome {
        if self.ensure_listener(stream).is_terminal() {
            return SuperviseOutcome::Stopped;
        }

        let mut delay = self.policy.first_delay();
        // The first run always starts from 0-0; the reader may still be
        // catching up, so the registry is only consulted for restarts.
        let mut last_id = StreamId::ZERO;
        loop {
            let args = ListenArgs {
                stream: stream.to_string(),
                group: self.group.clone(),
                consumer: self.consumer.clone(),
                last_id,
            };

            let started = Instant::now();
            let mut child = match self.runner.spawn_listen(&args) {
                Ok(child) => child,
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to start listener");
                    if !sleep_or_cancel(delay, &cancel).await {
                        return SuperviseOutcome::Cancelled;
                    }
                    delay = self.policy.next_delay(delay);
                    continue;
                }
            };
            debug!(stream = %stream, last_id = %args.last_id, "Listener started");

            match self.pump(stream, &mut child, &cancel).await {
                Pump::Stopped => {
                    info!(stream = %stream, "No listeners configured, supervision stopped");
                    terminate(&mut child).await;
                    return SuperviseOutcome::Stopped;
                }
                Pump::Cancelled => {
                    terminate(&mut child).await;
                    return SuperviseOutcome::Cancelled;
                }
                Pump::Eof => {}
            }

            let waited = tokio::select! {
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status),
            };
            let Some(status) = waited else {
                terminate(&mut child).await;
                return SuperviseOutcome::Cancelled;
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to wait for listener");
                    None
                }
            };

            if code != Some(RECOVERABLE_EXIT_CODE) {
                info!(stream = %stream, exit_code = ?code, "Listener exited");
                return SuperviseOutcome::Exited(code);
            }

            if started.elapsed() >= self.policy.max_delay {
                delay = self.policy.first_delay();
            }

            warn!(stream = %stream, delay_ms = delay.as_millis() as u64, "Listener failed, restarting");
            self.update(stream, |listener| {
                listener.status = ListenerStatus::Error;
                listener.restarts += 1;
                Some(listener.push_output(&format!(
                    "Listener exited with code {}, restarting",
                    RECOVERABLE_EXIT_CODE
                )))
            });

            if !sleep_or_cancel(delay, &cancel).await {
                return SuperviseOutcome::Cancelled;
            }
            delay = self.policy.next_delay(delay);
            last_id = self.resume_cursor(stream);
        }
    }

    async fn pump(&self, stream: &str, child: &mut Child, cancel: &CancellationToken) -> Pump {
        let Some(stdout) = child.stdout.take() else {
            warn!(stream = %stream, "Listener stdout unavailable");
            return Pump::Eof;
        };

        let mut lines = LineReader::new(stdout);
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return Pump::Cancelled,
                read = lines.next_line() => match read {
                    Ok(Some(line)) => line,
                    Ok(None) => return Pump::Eof,
                    Err(e) => {
                        warn!(stream = %stream, error = %e, "Failed to read listener output");
                        return Pump::Eof;
                    }
                },
            };

            if self.handle_line(stream, &line) {
                return Pump::Stopped;
            }
        }
    }
}

async fn terminate(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Returns false if cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::messaging::EventKind;
    use crate::streams::Fields;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        registry: Arc<StreamRegistry>,
        bus: Arc<EventBus>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(StreamRegistry::new());
            let bus = Arc::new(EventBus::new());
            let events = Arc::new(Mutex::new(Vec::new()));
            for kind in [EventKind::ListenerDiscovered, EventKind::ListenerStatusChanged] {
                let events = Arc::clone(&events);
                bus.subscribe(kind, move |e| events.lock().unwrap().push(e.clone()));
            }
            Self {
                dir: TempDir::new().unwrap(),
                registry,
                bus,
                events,
            }
        }

        /// Supervisor whose runner is `sh <script>`; `$1` is the listen
        /// verb, `$2` the stream, and `$DIR` the harness temp dir.
        fn supervisor(&self, body: &str) -> ListenerSupervisor {
            let script = self.dir.path().join("runner.sh");
            std::fs::write(
                &script,
                format!("DIR='{}'\n{}\n", self.dir.path().display(), body),
            )
            .unwrap();
            let runner = RunnerCommand::new("sh", [script.to_string_lossy().into_owned()]);
            ListenerSupervisor::new(runner, Arc::clone(&self.registry), Arc::clone(&self.bus))
                .with_policy(RestartPolicy {
                    initial_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(20),
                })
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn statuses(&self) -> Vec<ListenerStatus> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::ListenerStatusChanged { listener, .. } => Some(listener.status),
                    _ => None,
                })
                .collect()
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    async fn run(sup: &ListenerSupervisor, stream: &str) -> SuperviseOutcome {
        tokio::time::timeout(
            Duration::from_secs(10),
            sup.supervise(stream, CancellationToken::new()),
        )
        .await
        .expect("supervise did not finish")
    }

    // =========================================================================
    // State machine
    // =========================================================================

    #[tokio::test]
    async fn test_no_listeners_line_stops_without_restart() {
        let h = Harness::new();
        let sup = h.supervisor(
            r#"echo "$@" >> "$DIR/calls"
echo "There are no local listeners associated with $2 event in configuration."
sleep 30"#,
        );

        assert_eq!(run(&sup, "orders").await, SuperviseOutcome::Stopped);

        let listener = sup.listener("orders").unwrap();
        assert_eq!(listener.status, ListenerStatus::Stopped);
        assert_eq!(listener.restarts, 0);
        assert_eq!(read_lines(&h.path("calls")).len(), 1);
        assert_eq!(h.statuses(), vec![ListenerStatus::Stopped]);

        // A stopped stream is never started again.
        assert_eq!(run(&sup, "orders").await, SuperviseOutcome::Stopped);
        assert_eq!(read_lines(&h.path("calls")).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_processing_line_warns_and_keeps_running() {
        let h = Harness::new();
        let sup = h.supervisor(
            r#"echo "Listener error. Failed processing message 1-0"
echo "still alive"
exit 0"#,
        );

        assert_eq!(run(&sup, "orders").await, SuperviseOutcome::Exited(Some(0)));

        let listener = sup.listener("orders").unwrap();
        assert_eq!(listener.status, ListenerStatus::Warning);
        assert_eq!(listener.output.len(), 2);
        assert!(listener.output[1].ends_with(": still alive"));
        assert_eq!(h.statuses(), vec![ListenerStatus::Warning]);
    }

    #[tokio::test]
    async fn test_marker_split_across_chunks() {
        let h = Harness::new();
        let sup = h.supervisor(
            r#"printf 'Listener error. Failed'
sleep 0.2
printf ' processing message 5-0\n'
exit 0"#,
        );

        run(&sup, "orders").await;
        assert_eq!(
            sup.listener("orders").unwrap().status,
            ListenerStatus::Warning
        );
    }

    #[tokio::test]
    async fn test_first_launch_from_zero_restart_from_last_message() {
        let h = Harness::new();
        h.registry.register("orders");
        for id in ["1700000000000-0", "1700000000000-5"] {
            h.registry
                .append_message("orders", id.parse().unwrap(), Fields::new());
        }

        let sup = h.supervisor(
            r#"echo "$@" >> "$DIR/calls"
if [ ! -f "$DIR/failed_once" ]; then
  touch "$DIR/failed_once"
  exit 1
fi
exit 0"#,
        );

        assert_eq!(run(&sup, "orders").await, SuperviseOutcome::Exited(Some(0)));

        assert_eq!(
            read_lines(&h.path("calls")),
            vec![
                "streamer:listen orders --last_id=0-0",
                "streamer:listen orders --last_id=1700000000000-5",
            ]
        );

        let listener = sup.listener("orders").unwrap();
        assert_eq!(listener.restarts, 1);
        assert_eq!(listener.status, ListenerStatus::Error);
        assert_eq!(h.statuses(), vec![ListenerStatus::Error]);
    }

    #[tokio::test]
    async fn test_restart_without_messages_uses_zero_cursor() {
        let h = Harness::new();
        let sup = h.supervisor(
            r#"echo "$@" >> "$DIR/calls"
if [ ! -f "$DIR/failed_once" ]; then
  touch "$DIR/failed_once"
  exit 1
fi
exit 0"#,
        );

        run(&sup, "orders").await;
        assert_eq!(
            read_lines(&h.path("calls")),
            vec![
                "streamer:listen orders --last_id=0-0",
                "streamer:listen orders --last_id=0-0",
            ]
        );
    }

    #[tokio::test]
    async fn test_other_exit_code_ends_supervision() {
        let h = Harness::new();
        let sup = h.supervisor(r#"echo "$@" >> "$DIR/calls"; exit 2"#);

        assert_eq!(run(&sup, "orders").await, SuperviseOutcome::Exited(Some(2)));
        assert_eq!(read_lines(&h.path("calls")).len(), 1);
        assert_eq!(sup.listener("orders").unwrap().status, ListenerStatus::Ok);
        assert!(h.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_group_and_consumer_forwarded() {
        let h = Harness::new();
        let sup = h
            .supervisor(r#"echo "$@" >> "$DIR/calls""#)
            .with_consumer_group(Some("billing".into()), Some("w1".into()));

        run(&sup, "orders").await;
        assert_eq!(
            read_lines(&h.path("calls")),
            vec!["streamer:listen orders --group=billing --consumer=w1 --last_id=0-0"]
        );
    }

    // =========================================================================
    // Events and lifecycle
    // =========================================================================

    #[tokio::test]
    async fn test_listener_discovered_precedes_status_events() {
        let h = Harness::new();
        let sup = h.supervisor(r#"echo "Listener error. Failed processing message 9-9""#);

        run(&sup, "orders").await;

        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::ListenerDiscovered);
        match &events[1] {
            Event::ListenerStatusChanged {
                listener,
                last_output,
            } => {
                assert_eq!(listener.name, "orders");
                assert!(last_output.ends_with("Failed processing message 9-9"));
            }
            other => panic!("unexpected event {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_status_events_stay_small_as_output_grows() {
        let h = Harness::new();
        let sup = h.supervisor(
            r#"i=0
while [ $i -lt 50 ]; do
  echo "Listener error. Failed processing message $i-0"
  i=$((i + 1))
done"#,
        );

        run(&sup, "orders").await;

        let events = h.events.lock().unwrap();
        let sizes: Vec<usize> = events
            .iter()
            .filter(|e| e.kind() == EventKind::ListenerStatusChanged)
            .map(|e| serde_json::to_string(e).unwrap().len())
            .collect();
        assert_eq!(sizes.len(), 50);
        let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        assert!(max - min < 8, "event size grew from {} to {}", min, max);

        match events.last().unwrap() {
            Event::ListenerStatusChanged { listener, .. } => assert_eq!(listener.output_lines, 50),
            other => panic!("unexpected event {:?}", other.kind()),
        }
        assert_eq!(sup.listener("orders").unwrap().output.len(), 50);
    }

    #[tokio::test]
    async fn test_listener_discovered_once_per_stream() {
        let h = Harness::new();
        let sup = h.supervisor("exit 0");

        run(&sup, "orders").await;
        run(&sup, "orders").await;
        run(&sup, "payments").await;

        let discovered = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == EventKind::ListenerDiscovered)
            .count();
        assert_eq!(discovered, 2);
        assert_eq!(sup.listener_names(), vec!["orders", "payments"]);
    }

    #[tokio::test]
    async fn test_cancel_kills_running_listener() {
        let h = Harness::new();
        let sup = Arc::new(h.supervisor("sleep 30"));
        let cancel = CancellationToken::new();

        let task = {
            let sup = Arc::clone(&sup);
            let cancel = cancel.clone();
            tokio::spawn(async move { sup.supervise("orders", cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert_eq!(outcome, SuperviseOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retried_until_cancelled() {
        let registry = Arc::new(StreamRegistry::new());
        let bus = Arc::new(EventBus::new());
        let sup = ListenerSupervisor::new(
            RunnerCommand::new("/nonexistent/runner-9f3a", Vec::<String>::new()),
            registry,
            bus,
        )
        .with_policy(RestartPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        });

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        assert_eq!(
            sup.supervise("orders", cancel).await,
            SuperviseOutcome::Cancelled
        );
        assert_eq!(sup.listener("orders").unwrap().status, ListenerStatus::Ok);
    }

    #[tokio::test]
    async fn test_detect_absent_runner() {
        let registry = Arc::new(StreamRegistry::new());
        let bus = Arc::new(EventBus::new());
        let runner = RunnerCommand::new("sh", ["-c", "exit 1"]);
        assert!(ListenerSupervisor::detect(runner, registry, bus).await.is_none());
    }

    // =========================================================================
    // RestartPolicy
    // =========================================================================

    #[test]
    fn test_restart_policy_backoff_is_bounded() {
        let policy = RestartPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        let mut delay = policy.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = policy.next_delay(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![1000, 2000, 2000, 2000, 2000]);
    }

    #[test]
    fn test_restart_policy_zero_delay_is_floored() {
        let policy = RestartPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.first_delay(), MIN_RESTART_DELAY);
        assert_eq!(policy.next_delay(Duration::ZERO), MIN_RESTART_DELAY * 2);
        assert_eq!(policy.next_delay(policy.first_delay()), MIN_RESTART_DELAY * 2);

        let flat = RestartPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        assert_eq!(flat.next_delay(Duration::ZERO), MIN_RESTART_DELAY);
    }
}
