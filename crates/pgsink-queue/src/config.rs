use core::time::Duration;

/// Tuning knobs for a [`WorkQueue`](crate::WorkQueue).
///
/// The defaults mirror a queue sitting in front of a small Postgres pool: five
/// concurrent writes, five retries one second apart, a health probe every ten
/// seconds and a two second back-off while the store is unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of items processed at the same time. Clamped to 1.
    pub concurrency: usize,
    /// Retries after the first failed attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Fixed delay between two attempts of the same item.
    pub retry_delay: Duration,
    /// Period of the health poller. The first probe runs one period after start.
    pub health_interval: Duration,
    /// How long the admission gate waits before re-reading an unhealthy state.
    pub precondition_retry_timeout: Duration,
    /// Optional cap on buffered plus in-flight items. `None` is unbounded.
    pub capacity: Option<usize>,
    /// Optional limit on a single attempt. An attempt that runs longer fails.
    pub attempt_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            health_interval: Duration::from_secs(10),
            precondition_retry_timeout: Duration::from_secs(2),
            capacity: None,
            attempt_timeout: None,
        }
    }
}

impl QueueConfig {
    /// Total number of attempts an item gets before it is dropped.
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self
    }
}
