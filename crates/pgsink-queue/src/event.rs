//! Queue lifecycle events.
//!
//! The queue never logs on behalf of its owner. Everything worth reporting,
//! most importantly an item dropped after its last retry, is published on a
//! [`Bus`] and left to subscribers.
//!
//! ## Rules
//! - Publishing never blocks and never fails; without subscribers the event is
//!   discarded.
//! - Slow subscribers observe `RecvError::Lagged(n)` and skip the `n` oldest
//!   events.

use tokio::sync::broadcast;

/// Something observable happened inside a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// An item was processed successfully after `attempts` attempts.
    Processed { attempts: u32 },
    /// Attempt number `attempt` failed and another one is scheduled.
    Retrying { attempt: u32, error: String },
    /// The item failed `attempts` times and was dropped.
    Failed { attempts: u32, error: String },
    /// The admission gate stopped dequeuing because the store is unhealthy.
    GateClosed,
    /// The admission gate resumed dequeuing.
    GateOpened,
    /// The health poller observed a new state.
    HealthChanged { healthy: bool },
    /// The queue finished draining and stopped.
    Drained,
}

/// Broadcast channel for [`QueueEvent`]s.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<QueueEvent>,
}

impl Bus {
    /// Creates a bus keeping at most `capacity` undelivered events (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    /// A receiver only sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}
