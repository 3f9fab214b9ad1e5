//! Detection of new streams.
//!
//! A [`Discovery`] strategy yields batches of candidate stream names; the
//! [`DiscoveryMonitor`] dedups them against the registry and launches work
//! for each stream the first time it is seen.
//!
//! Two strategies exist:
//!
//! - [`CommandTapDiscovery`] watches the store's command trace for
//!   `XADD <stream>` calls;
//! - [`KeyScanDiscovery`] periodically lists every key and keeps those of
//!   stream type.

mod command;
mod monitor;
mod scan;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::streams::Stream;

pub use command::{parse_append_command, CommandTapDiscovery, APPEND_VERB};
pub use monitor::{DiscoveryMonitor, DEFAULT_MAX_CONSECUTIVE_ERRORS};
pub use scan::KeyScanDiscovery;

/// A source of candidate stream names.
#[async_trait]
pub trait Discovery: Send {
    /// Wait for the next batch of names. Names may repeat across batches.
    async fn next_batch(&mut self) -> Result<Vec<String>, StoreError>;
}

/// Starts per-stream work for a newly discovered stream.
pub trait StreamLauncher: Send + Sync {
    fn launch(&self, stream: &Stream);
}

impl<F> StreamLauncher for F
where
    F: Fn(&Stream) + Send + Sync,
{
    fn launch(&self, stream: &Stream) {
        self(stream)
    }
}

/// Which discovery strategy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    #[default]
    Monitor,
    Scan,
}

impl FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monitor" => Ok(Self::Monitor),
            "scan" => Ok(Self::Scan),
            other => Err(format!("unknown discovery mode '{}' (expected monitor or scan)", other)),
        }
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monitor => write!(f, "monitor"),
            Self::Scan => write!(f, "scan"),
        }
    }
}
