use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A single accepted payload waiting to be persisted.
///
/// Created when a request arrives at a worker and owned by that worker's queue
/// until it is either stored or dropped after exhausting its retries. Cloning is
/// cheap: the payload is reference counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub timestamp: DateTime<Utc>,
    pub payload: Bytes,
}

impl WorkItem {
    /// Stamps `payload` with the current wall-clock time.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_timestamp(Utc::now(), payload)
    }

    pub fn with_timestamp(timestamp: DateTime<Utc>, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
