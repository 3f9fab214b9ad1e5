//! Redis binding of the store primitives.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, IntoConnectionInfo, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommandTap, Entry, StoreError, StreamStore};
use crate::streams::{Fields, StreamId};

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

/// [`StreamStore`] over a Redis server.
///
/// Short commands share one multiplexed connection. Each tailed stream
/// gets its own connection because `XREAD BLOCK 0` holds it until data
/// arrives.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    tail_conns: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let mut info = (config.host.as_str(), config.port).into_connection_info()?;
        info.redis.db = config.db;
        info.redis.password = config.password.clone();

        let client = redis::Client::open(info)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let store = Self {
            client,
            conn,
            tail_conns: Mutex::new(HashMap::new()),
        };
        store.ping().await?;
        debug!(host = %config.host, port = config.port, db = config.db, "Connected to Redis");
        Ok(store)
    }

    async fn tail_connection(&self, stream: &str) -> Result<MultiplexedConnection, StoreError> {
        let existing = self
            .tail_conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned();
        if let Some(conn) = existing {
            return Ok(conn);
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        self.tail_conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.to_string(), conn.clone());
        Ok(conn)
    }

    fn drop_tail_connection(&self, stream: &str) {
        self.tail_conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(stream);
    }
}

#[async_trait]
impl StreamStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn range(&self, stream: &str) -> Result<Vec<Entry>, StoreError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_all(stream).await?;
        reply.ids.iter().map(to_entry).collect()
    }

    async fn tail(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>, StoreError> {
        let mut conn = self.tail_connection(stream).await?;
        let opts = StreamReadOptions::default().block(0);
        let reply: Result<Option<StreamReadReply>, _> = conn
            .xread_options(&[stream], &[after.to_string()], &opts)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.drop_tail_connection(stream);
                return Err(e.into());
            }
        };

        let mut entries = Vec::new();
        for key in reply.into_iter().flat_map(|r| r.keys) {
            for id in &key.ids {
                entries.push(to_entry(id)?);
            }
        }
        Ok(entries)
    }

    async fn open_tap(&self) -> Result<Box<dyn CommandTap>, StoreError> {
        let mut monitor = self.client.get_async_monitor().await?;
        monitor.monitor().await?;
        Ok(Box::new(RedisTap {
            lines: Box::pin(monitor.into_on_message::<String>()),
        }))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut iter = conn.scan::<String>().await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn key_type(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let kind: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        Ok(kind)
    }
}

/// `MONITOR` feed.
struct RedisTap {
    lines: Pin<Box<dyn Stream<Item = String> + Send>>,
}

#[async_trait]
impl CommandTap for RedisTap {
    async fn next_line(&mut self) -> Result<String, StoreError> {
        self.lines.next().await.ok_or(StoreError::TapClosed)
    }
}

fn to_entry(raw: &redis::streams::StreamId) -> Result<Entry, StoreError> {
    let id: StreamId = raw.id.parse()?;
    let fields: Fields = raw
        .map
        .iter()
        .map(|(name, value)| (name.clone(), value_to_string(value)))
        .collect();
    Ok(Entry::new(id, fields))
}

fn value_to_string(value: &Value) -> String {
    redis::from_redis_value::<String>(value)
        .or_else(|_| {
            redis::from_redis_value::<Vec<u8>>(value)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .unwrap_or_else(|_| format!("{:?}", value))
}
