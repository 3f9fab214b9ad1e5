//! Message store primitives.
//!
//! The engine needs very little from the store:
//!
//! - a feed of executed commands ([`CommandTap`]) or a key listing with
//!   per-key types, to notice new streams;
//! - a range read returning a stream's whole history;
//! - a blocking tail read that waits for entries after a given id.
//!
//! [`RedisStore`] provides these over Redis (`MONITOR`, `SCAN`/`TYPE`,
//! `XRANGE`, `XREAD BLOCK 0`). [`MemoryStore`] keeps everything in process.

mod memory;
mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::streams::{Fields, InvalidStreamId, StreamId};

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisConfig, RedisStore};

/// Key type reported by the store for stream keys.
pub const STREAM_KEY_TYPE: &str = "stream";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Command tap closed")]
    TapClosed,
    #[error(transparent)]
    InvalidId(#[from] InvalidStreamId),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One stream entry as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: StreamId,
    pub fields: Fields,
}

impl Entry {
    pub fn new(id: StreamId, fields: Fields) -> Self {
        Self { id, fields }
    }
}

/// Live feed of raw command-trace lines.
#[async_trait]
pub trait CommandTap: Send {
    /// Wait for the next traced command.
    async fn next_line(&mut self) -> Result<String, StoreError>;
}

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Round-trip to check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Every entry currently in `stream`, oldest first.
    async fn range(&self, stream: &str) -> Result<Vec<Entry>, StoreError>;

    /// Entries after `after`, oldest first. Waits without timeout until at
    /// least one exists.
    async fn tail(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>, StoreError>;

    /// Start a command feed.
    async fn open_tap(&self) -> Result<Box<dyn CommandTap>, StoreError>;

    /// All key names.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Type name of `key`, [`STREAM_KEY_TYPE`] for streams.
    async fn key_type(&self, key: &str) -> Result<String, StoreError>;
}
