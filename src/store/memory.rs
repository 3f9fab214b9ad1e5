//! In-process store, mainly for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{CommandTap, Entry, StoreError, StreamStore, STREAM_KEY_TYPE};
use crate::streams::{Fields, StreamId};

type TapItem = Result<String, StoreError>;

#[derive(Debug, Default)]
struct Failures {
    range: u32,
    tail: u32,
    keys: u32,
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, BTreeMap<StreamId, Fields>>,
    plain_keys: HashSet<String>,
    failures: Failures,
    next_timestamp: u64,
}

/// [`StreamStore`] kept in memory.
///
/// Tails block until a matching append, tap lines are scripted through
/// [`MemoryStore::push_command`] / [`MemoryStore::push_tap_error`], and
/// read failures can be injected.
pub struct MemoryStore {
    state: Mutex<State>,
    version: watch::Sender<u64>,
    tap_tx: mpsc::UnboundedSender<TapItem>,
    tap_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TapItem>>>,
    range_calls: AtomicUsize,
    tail_calls: AtomicUsize,
    key_type_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(State::default()),
            version,
            tap_tx,
            tap_rx: Arc::new(tokio::sync::Mutex::new(tap_rx)),
            range_calls: AtomicUsize::new(0),
            tail_calls: AtomicUsize::new(0),
            key_type_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Append with a generated id, like `XADD <stream> *`.
    pub fn add(&self, stream: &str, fields: &[(&str, &str)]) -> StreamId {
        let id = {
            let mut state = self.state();
            state.next_timestamp += 1;
            StreamId::new(state.next_timestamp, 0)
        };
        self.add_with_id(stream, id, fields);
        id
    }

    pub fn add_with_id(&self, stream: &str, id: StreamId, fields: &[(&str, &str)]) {
        let fields: Fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        {
            let mut state = self.state();
            state.next_timestamp = state.next_timestamp.max(id.timestamp);
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .insert(id, fields);
        }
        self.bump();
    }

    /// Create a key that is not a stream.
    pub fn set_plain_key(&self, key: &str) {
        self.state().plain_keys.insert(key.to_string());
    }

    /// Queue a command-trace line for the tap.
    pub fn push_command(&self, line: impl Into<String>) {
        let _ = self.tap_tx.send(Ok(line.into()));
    }

    /// Queue a tap read failure.
    pub fn push_tap_error(&self, reason: impl Into<String>) {
        let _ = self.tap_tx.send(Err(StoreError::Unavailable(reason.into())));
    }

    pub fn fail_next_ranges(&self, n: u32) {
        self.state().failures.range = n;
    }

    pub fn fail_next_tails(&self, n: u32) {
        self.state().failures.tail = n;
    }

    pub fn fail_next_key_scans(&self, n: u32) {
        self.state().failures.keys = n;
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn tail_calls(&self) -> usize {
        self.tail_calls.load(Ordering::SeqCst)
    }

    pub fn key_type_calls(&self) -> usize {
        self.key_type_calls.load(Ordering::SeqCst)
    }

    fn entries_after(&self, stream: &str, after: StreamId) -> Vec<Entry> {
        use std::ops::Bound::{Excluded, Unbounded};

        self.state()
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .range((Excluded(after), Unbounded))
                    .map(|(id, fields)| Entry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn range(&self, stream: &str) -> Result<Vec<Entry>, StoreError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.state().failures.range) {
            return Err(StoreError::Unavailable("injected range failure".into()));
        }

        Ok(self
            .state()
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, fields)| Entry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tail(&self, stream: &str, after: StreamId) -> Result<Vec<Entry>, StoreError> {
        self.tail_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.state().failures.tail) {
            return Err(StoreError::Unavailable("injected tail failure".into()));
        }

        // Subscribe before checking so an append in between still wakes us.
        let mut changes = self.version.subscribe();
        loop {
            let entries = self.entries_after(stream, after);
            if !entries.is_empty() {
                return Ok(entries);
            }
            if changes.changed().await.is_err() {
                return Err(StoreError::Unavailable("store dropped".into()));
            }
        }
    }

    async fn open_tap(&self) -> Result<Box<dyn CommandTap>, StoreError> {
        Ok(Box::new(MemoryTap {
            rx: Arc::clone(&self.tap_rx),
        }))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.state();
        if take_failure(&mut state.failures.keys) {
            return Err(StoreError::Unavailable("injected scan failure".into()));
        }

        let mut keys: Vec<String> = state
            .streams
            .keys()
            .chain(state.plain_keys.iter())
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn key_type(&self, key: &str) -> Result<String, StoreError> {
        self.key_type_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let kind = if state.streams.contains_key(key) {
            STREAM_KEY_TYPE
        } else if state.plain_keys.contains(key) {
            "string"
        } else {
            "none"
        };
        Ok(kind.to_string())
    }
}

struct MemoryTap {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TapItem>>>,
}

#[async_trait]
impl CommandTap for MemoryTap {
    async fn next_line(&mut self) -> Result<String, StoreError> {
        match self.rx.lock().await.recv().await {
            Some(item) => item,
            None => Err(StoreError::TapClosed),
        }
    }
}
