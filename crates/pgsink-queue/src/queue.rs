//! The cloneable handle to a running queue.

use crate::{
    config::QueueConfig,
    dispatcher::{Command, Dispatcher, Shared},
    event::{Bus, QueueEvent},
    health::health_loop,
    processor::{HealthCheck, Processor},
};
use pgsink_core::{Error, Result};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Handle to an in-memory work queue.
///
/// Creating a queue spawns two tasks: a dispatcher that owns the buffer and
/// applies the [`Processor`], and a health poller that owns the health state.
/// Handles are cheap to clone and all of them talk to the same tasks.
///
/// [`enqueue`](Self::enqueue) never waits. [`close`](Self::close) waits until
/// every accepted item has been processed or dropped.
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    health: watch::Receiver<bool>,
    bus: Bus,
    shared: Arc<Shared>,
    closing: CancellationToken,
    capacity: Option<usize>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            health: self.health.clone(),
            bus: self.bus.clone(),
            shared: Arc::clone(&self.shared),
            closing: self.closing.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Starts a queue applying `processor` to every item and polling `health`
    /// every [`QueueConfig::health_interval`].
    ///
    /// The store is assumed healthy until the first probe completes.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<P, H>(config: QueueConfig, processor: P, health: H) -> Self
    where
        P: Processor<T>,
        H: HealthCheck,
    {
        let config = config.normalized();
        let (tx, rx) = mpsc::unbounded_channel();
        let (health_tx, health_rx) = watch::channel(true);
        let bus = Bus::new(EVENT_BUS_CAPACITY);
        let shared = Arc::new(Shared {
            depth: AtomicUsize::new(0),
            drained: CancellationToken::new(),
        });
        let poller = CancellationToken::new();

        tokio::spawn(health_loop(
            health,
            config.health_interval,
            health_tx,
            bus.clone(),
            poller.clone(),
        ));

        let capacity = config.capacity;
        let dispatcher = Dispatcher::new(
            config,
            processor,
            health_rx.clone(),
            bus.clone(),
            Arc::clone(&shared),
        );
        tokio::spawn(dispatcher.run(rx, poller));

        Self {
            tx,
            health: health_rx,
            bus,
            shared,
            closing: CancellationToken::new(),
            capacity,
        }
    }

    /// Appends `item` to the tail of the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - [`close`](Self::close) has been called ([`Error::QueueClosed`]).
    /// - A capacity is configured and already reached ([`Error::QueueFull`]).
    pub fn enqueue(&self, item: T) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(Error::QueueClosed);
        }

        match self.capacity {
            Some(capacity) => {
                self.shared
                    .depth
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                        (depth < capacity).then_some(depth + 1)
                    })
                    .map_err(|_| Error::QueueFull { capacity })?;
            }
            None => {
                self.shared.depth.fetch_add(1, Ordering::AcqRel);
            }
        }

        self.tx.send(Command::Push(item)).map_err(|_| {
            self.shared.depth.fetch_sub(1, Ordering::AcqRel);
            Error::QueueClosed
        })
    }

    /// Stops admitting items and waits until the queue has drained.
    ///
    /// Once every buffered and in-flight item is finished the dispatcher exits
    /// and the health poller is cancelled. Calling `close` again, from any
    /// handle, waits for the same drain.
    ///
    /// While the store is unhealthy nothing is dequeued, so this can wait for
    /// as long as the store stays down.
    pub async fn close(&self) {
        self.closing.cancel();
        // The dispatcher may already be gone, in which case `drained` is set.
        let _ = self.tx.send(Command::Close);
        self.shared.drained.cancelled().await;
    }

    /// Number of items buffered or in flight.
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest result of the health poller.
    pub fn is_healthy(&self) -> bool {
        *self.health.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Subscribes to the events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }
}
