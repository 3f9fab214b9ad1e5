//! Event messaging for swarm.
//!
//! Engine components publish typed [`Event`]s on the [`EventBus`]; observers
//! subscribe either with synchronous per-kind handlers or with a channel.
//!
//! ## Architecture
//!
//! ```text
//!     ┌───────────┐  ┌────────┐  ┌────────────┐
//!     │ Discovery │  │ Reader │  │ Supervisor │
//!     └─────┬─────┘  └───┬────┘  └─────┬──────┘
//!           │ publish    │             │
//!           ▼            ▼             ▼
//!     ┌──────────────────────────────────────┐
//!     │               EventBus               │
//!     └──────┬──────────────────────┬────────┘
//!            │ handlers (in order)  │ broadcast
//!            ▼                      ▼
//!     ┌─────────────┐        ┌──────────────────┐
//!     │ subscribers │        │ TerminalRenderer │
//!     └─────────────┘        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use swarm::messaging::{EventBus, TerminalRenderer};
//!
//! let bus = EventBus::new();
//! bus.on_stream_discovered(|stream| println!("new stream {}", stream.name));
//!
//! let receiver = bus.subscribe_channel();
//! tokio::spawn(async move {
//!     TerminalRenderer::new().run_loop(receiver).await;
//! });
//! ```

mod bus;
mod renderer;
mod types;

pub use bus::{BusError, EventBus, EventReceiver, Handler, SubscriptionId};
pub use renderer::{RenderMode, RenderStyle, TerminalRenderer};
pub use types::{Event, EventKind};
