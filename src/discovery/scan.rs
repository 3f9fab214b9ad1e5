//! Discovery by periodic key scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::Discovery;
use crate::store::{StoreError, StreamStore, STREAM_KEY_TYPE};

/// Lists all keys on an interval and yields those of stream type.
///
/// A key's type is looked up once and cached for the lifetime of the
/// strategy.
pub struct KeyScanDiscovery {
    store: Arc<dyn StreamStore>,
    interval: Duration,
    types: HashMap<String, String>,
    scanned: bool,
}

impl KeyScanDiscovery {
    pub fn new(store: Arc<dyn StreamStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            types: HashMap::new(),
            scanned: false,
        }
    }

    async fn key_type(&mut self, key: &str) -> Result<&str, StoreError> {
        if !self.types.contains_key(key) {
            let kind = self.store.key_type(key).await?;
            self.types.insert(key.to_string(), kind);
        }
        Ok(self.types.get(key).map(String::as_str).unwrap_or_default())
    }
}

#[async_trait]
impl Discovery for KeyScanDiscovery {
    async fn next_batch(&mut self) -> Result<Vec<String>, StoreError> {
        if self.scanned {
            tokio::time::sleep(self.interval).await;
        }
        self.scanned = true;

        let mut streams = Vec::new();
        for key in self.store.keys().await? {
            if self.key_type(&key).await? == STREAM_KEY_TYPE {
                streams.push(key);
            }
        }
        Ok(streams)
    }
}
