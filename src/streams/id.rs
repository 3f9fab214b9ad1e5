//! Store-assigned stream entry identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid stream entry id: {0:?}")]
pub struct InvalidStreamId(pub String);

/// Identifier of a stream entry, `<timestamp>-<sequence>`.
///
/// Ordering is numeric on the `(timestamp, sequence)` pair. The textual
/// form is not zero-padded, so comparing the strings directly would put
/// `999-0` after `1000-0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId {
    pub timestamp: u64,
    pub sequence: u64,
}

impl StreamId {
    /// The smallest possible id. Used as the "from the beginning" cursor.
    pub const ZERO: StreamId = StreamId {
        timestamp: 0,
        sequence: 0,
    };

    pub fn new(timestamp: u64, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }
}

impl FromStr for StreamId {
    type Err = InvalidStreamId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidStreamId(s.to_string());
        let (ts, seq) = s.split_once('-').ok_or_else(invalid)?;
        let timestamp = ts.parse::<u64>().map_err(|_| invalid())?;
        let sequence = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(timestamp, sequence))
    }
}

impl TryFrom<String> for StreamId {
    type Error = InvalidStreamId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.sequence)
    }
}
