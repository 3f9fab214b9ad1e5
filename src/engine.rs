//! Wiring of discovery, readers and listener supervision.
//!
//! The [`Engine`] owns the shared registry and event bus, runs a discovery
//! strategy through a [`DiscoveryMonitor`] and, for every new stream,
//! spawns a [`StreamReader`] task plus a listener supervision task when a
//! [`ListenerSupervisor`] is present. Task handles are kept per stream so
//! [`Engine::shutdown`] can cancel and join all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::discovery::{
    Discovery, DiscoveryMonitor, StreamLauncher, DEFAULT_MAX_CONSECUTIVE_ERRORS,
};
use crate::listener::ListenerSupervisor;
use crate::messaging::EventBus;
use crate::reader::StreamReader;
use crate::store::{RedisConfig, RedisStore, StoreError, StreamStore};
use crate::streams::{Stream, StreamRegistry};

/// Errors that end the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to connect with Redis: {0}")]
    Startup(#[source] StoreError),
    #[error("Stream discovery failed {errors} times in a row, last error: {last_error}")]
    DiscoveryExhausted {
        errors: u32,
        #[source]
        last_error: StoreError,
    },
}

/// Connect to Redis, failing with [`EngineError::Startup`] when the server
/// cannot be reached.
pub async fn connect_store(config: &RedisConfig) -> Result<Arc<dyn StreamStore>, EngineError> {
    let store = RedisStore::connect(config)
        .await
        .map_err(EngineError::Startup)?;
    Ok(Arc::new(store))
}

/// Running per-stream tasks, keyed by stream name.
#[derive(Default)]
struct TaskArena {
    tasks: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl TaskArena {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<JoinHandle<()>>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, stream: &str, handle: JoinHandle<()>) {
        self.lock().entry(stream.to_string()).or_default().push(handle);
    }

    fn drain(&self) -> Vec<JoinHandle<()>> {
        self.lock().drain().flat_map(|(_, handles)| handles).collect()
    }
}

/// Starts the reader and, if listening is available, the supervisor for a
/// stream.
struct TaskLauncher {
    store: Arc<dyn StreamStore>,
    registry: Arc<StreamRegistry>,
    bus: Arc<EventBus>,
    supervisor: Option<Arc<ListenerSupervisor>>,
    arena: Arc<TaskArena>,
    cancel: CancellationToken,
    read_retry: Duration,
}

impl StreamLauncher for TaskLauncher {
    fn launch(&self, stream: &Stream) {
        let name = stream.name.clone();

        let reader = StreamReader::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
        )
        .with_retry_delay(self.read_retry);
        let token = self.cancel.child_token();
        let stream_name = name.clone();
        self.arena.push(
            &name,
            tokio::spawn(async move { reader.run(&stream_name, token).await }),
        );

        if let Some(supervisor) = &self.supervisor {
            let supervisor = Arc::clone(supervisor);
            let token = self.cancel.child_token();
            let stream_name = name.clone();
            self.arena.push(
                &name,
                tokio::spawn(async move {
                    let outcome = supervisor.supervise(&stream_name, token).await;
                    debug!(stream = %stream_name, outcome = ?outcome, "Listener supervision ended");
                }),
            );
        }
    }
}

/// The stream discovery and tailing engine.
pub struct Engine {
    store: Arc<dyn StreamStore>,
    registry: Arc<StreamRegistry>,
    bus: Arc<EventBus>,
    supervisor: Option<Arc<ListenerSupervisor>>,
    arena: Arc<TaskArena>,
    cancel: CancellationToken,
    read_retry: Duration,
    max_discovery_errors: u32,
    discovery_error_delay: Duration,
}

impl Engine {
    pub fn new(
        store: Arc<dyn StreamStore>,
        registry: Arc<StreamRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            supervisor: None,
            arena: Arc::new(TaskArena::default()),
            cancel: CancellationToken::new(),
            read_retry: Duration::from_secs(1),
            max_discovery_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            discovery_error_delay: Duration::from_millis(200),
        }
    }

    pub fn with_supervisor(mut self, supervisor: Option<ListenerSupervisor>) -> Self {
        self.supervisor = supervisor.map(Arc::new);
        self
    }

    pub fn with_read_retry(mut self, delay: Duration) -> Self {
        self.read_retry = delay;
        self
    }

    pub fn with_discovery_errors(mut self, max: u32, delay: Duration) -> Self {
        self.max_discovery_errors = max;
        self.discovery_error_delay = delay;
        self
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn supervisor(&self) -> Option<&Arc<ListenerSupervisor>> {
        self.supervisor.as_ref()
    }

    pub fn listening_available(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Token cancelled by [`Engine::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of tasks started for `stream`.
    pub fn task_count(&self, stream: &str) -> usize {
        self.arena.lock().get(stream).map_or(0, Vec::len)
    }

    /// Run discovery until shutdown or a fatal discovery failure.
    ///
    /// On failure all per-stream tasks are cancelled before returning.
    pub async fn run(&self, discovery: &mut dyn Discovery) -> Result<(), EngineError> {
        let launcher = TaskLauncher {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            bus: Arc::clone(&self.bus),
            supervisor: self.supervisor.clone(),
            arena: Arc::clone(&self.arena),
            cancel: self.cancel.clone(),
            read_retry: self.read_retry,
        };
        let monitor = DiscoveryMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
            Arc::new(launcher),
        )
        .with_max_consecutive_errors(self.max_discovery_errors)
        .with_error_delay(self.discovery_error_delay);

        info!(listening = self.listening_available(), "Engine started");
        let result = monitor.run(discovery, self.cancel.clone()).await;
        if result.is_err() {
            self.cancel.cancel();
        }
        result
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = self.arena.drain();
        debug!(tasks = handles.len(), "Waiting for stream tasks");
        for handle in handles {
            let _ = handle.await;
        }
        info!("Engine stopped");
    }
}
