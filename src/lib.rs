//! Swarm Library
//!
//! Discovers streams appearing in a Redis server, tails each of them and
//! optionally supervises one external consumer process per stream,
//! publishing everything as typed events.
//!
//! ## Main Components
//!
//! - [`streams`] - Stream ids, messages and the shared registry
//! - [`store`] - Store primitives (Redis and in-memory)
//! - [`discovery`] - Command-tap and key-scan discovery, dedup monitor
//! - [`reader`] - Per-stream catch-up and tail loop
//! - [`listener`] - Consumer-runner supervision and status tracking
//! - [`messaging`] - Event bus and terminal renderer
//! - [`engine`] - Wiring, task arena and shutdown
//! - [`config`] - Settings file and XDG directories
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm::{connect_store, CommandTapDiscovery, Engine, EventBus, Settings, StreamRegistry};
//!
//! let settings = Settings::default();
//! let store = connect_store(&settings.redis_config()).await?;
//! let engine = Engine::new(store.clone(), Arc::new(StreamRegistry::new()), Arc::new(EventBus::new()));
//! engine.bus().on_stream_discovered(|s| println!("{}", s.name));
//! engine.run(&mut CommandTapDiscovery::new(store)).await?;
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod listener;
pub mod messaging;
pub mod reader;
pub mod store;
pub mod streams;

// Re-export commonly used types
pub use config::{ConfigError, Settings, XdgDirs};
pub use discovery::{
    CommandTapDiscovery, Discovery, DiscoveryMode, DiscoveryMonitor, KeyScanDiscovery,
    StreamLauncher,
};
pub use engine::{connect_store, Engine, EngineError};
pub use listener::{
    ListenerStatus, ListenerSummary, ListenerSupervisor, RestartPolicy, RunnerCommand,
    StreamListener,
};
pub use messaging::{Event, EventBus, EventKind, EventReceiver, RenderMode, TerminalRenderer};
pub use reader::StreamReader;
pub use store::{MemoryStore, RedisConfig, RedisStore, StoreError, StreamStore};
pub use streams::{Message, Stream, StreamId, StreamRegistry};
