use crate::{
    config::QueueConfig,
    event::{Bus, QueueEvent},
    processor::Processor,
};
use core::{any::Any, panic::AssertUnwindSafe, time::Duration};
use futures::{FutureExt, StreamExt, stream::FuturesUnordered};
use portable_atomic::{AtomicUsize, Ordering};
use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Messages accepted by the dispatcher task.
pub(crate) enum Command<T> {
    Push(T),
    Close,
}

/// Final state of one item.
enum Outcome {
    Processed { attempts: u32 },
    Failed { attempts: u32, error: String },
}

/// Shared counters and signals between the dispatcher and its handles.
pub(crate) struct Shared {
    /// Items buffered or in flight.
    pub depth: AtomicUsize,
    /// Cancelled once the dispatcher has drained and stopped.
    pub drained: CancellationToken,
}

/// The task that owns the buffer.
///
/// Items leave the buffer in FIFO order, at most `concurrency` at a time, and
/// only while the cached health state reads healthy. Each in-flight item keeps
/// its slot across retries, so a retry never waits behind fresh arrivals.
pub(crate) struct Dispatcher<T, P> {
    config: QueueConfig,
    processor: Arc<P>,
    health: watch::Receiver<bool>,
    bus: Bus,
    shared: Arc<Shared>,
    buffer: VecDeque<T>,
    gate_open: bool,
}

impl<T, P> Dispatcher<T, P>
where
    T: Clone + Send + 'static,
    P: Processor<T>,
{
    pub(crate) fn new(
        config: QueueConfig,
        processor: P,
        health: watch::Receiver<bool>,
        bus: Bus,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            config,
            processor: Arc::new(processor),
            health,
            bus,
            shared,
            buffer: VecDeque::new(),
            gate_open: true,
        }
    }

    /// Runs until a close was requested (or every handle is gone) and the
    /// buffer and in-flight set are both empty. Stops the health poller
    /// through `poller` on the way out.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command<T>>,
        poller: CancellationToken,
    ) {
        // Waiters in `close()` and the poller are released even if this task
        // dies.
        let _drained = self.shared.drained.clone().drop_guard();
        let _poller = poller.clone().drop_guard();

        let mut in_flight = FuturesUnordered::new();
        let mut inbox_done = false;

        loop {
            // === Admission ===
            while in_flight.len() < self.config.concurrency && !self.buffer.is_empty() {
                if !self.admit() {
                    break;
                }
                let Some(item) = self.buffer.pop_front() else {
                    break;
                };
                in_flight.push(process_with_retry(
                    Arc::clone(&self.processor),
                    item,
                    self.config.clone(),
                    self.bus.clone(),
                ));
            }

            if inbox_done && self.buffer.is_empty() && in_flight.is_empty() {
                break;
            }

            let gate_blocked = !self.gate_open
                && !self.buffer.is_empty()
                && in_flight.len() < self.config.concurrency;

            tokio::select! {
                cmd = rx.recv(), if !inbox_done => match cmd {
                    Some(Command::Push(item)) => self.buffer.push_back(item),
                    Some(Command::Close) => {
                        tracing::info!("Starting queue drain. Size: {}", self.shared.depth.load(Ordering::Relaxed));
                        // Refuse new sends but keep reading what is already queued.
                        rx.close();
                    }
                    None => inbox_done = true,
                },
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    self.shared.depth.fetch_sub(1, Ordering::Relaxed);
                    self.report(outcome);
                }
                () = sleep(self.config.precondition_retry_timeout), if gate_blocked => {}
            }
        }

        poller.cancel();
        self.bus.publish(QueueEvent::Drained);
        tracing::info!("Queue closed.");
        self.shared.drained.cancel();
    }

    /// Reads the cached health state and tracks gate transitions.
    fn admit(&mut self) -> bool {
        let healthy = *self.health.borrow();
        if healthy != self.gate_open {
            self.gate_open = healthy;
            if healthy {
                tracing::debug!("Admission gate open");
                self.bus.publish(QueueEvent::GateOpened);
            } else {
                tracing::debug!(
                    "Admission gate closed with {} items buffered",
                    self.buffer.len()
                );
                self.bus.publish(QueueEvent::GateClosed);
            }
        }
        healthy
    }

    fn report(&self, outcome: Outcome) {
        match outcome {
            Outcome::Processed { attempts } => {
                self.bus.publish(QueueEvent::Processed { attempts });
            }
            Outcome::Failed { attempts, error } => {
                tracing::debug!("Dropping item after {attempts} attempts: {error}");
                self.bus.publish(QueueEvent::Failed { attempts, error });
            }
        }
    }
}

/// Runs every attempt of a single item.
///
/// Attempt `n + 1` starts no earlier than `retry_delay` after attempt `n`
/// failed. The item is dropped after `max_retries + 1` failed attempts.
async fn process_with_retry<T, P>(
    processor: Arc<P>,
    item: T,
    config: QueueConfig,
    bus: Bus,
) -> Outcome
where
    T: Clone + Send + 'static,
    P: Processor<T>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        match attempt_once(processor.as_ref(), item.clone(), config.attempt_timeout).await {
            Ok(()) => return Outcome::Processed { attempts: attempt },
            Err(error) if attempt < max_attempts => {
                tracing::debug!("Attempt {attempt}/{max_attempts} failed: {error}");
                bus.publish(QueueEvent::Retrying { attempt, error });
                sleep(config.retry_delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Outcome::Failed {
                    attempts: attempt,
                    error,
                };
            }
        }
    }
}

/// Runs one attempt. A panicking processor counts as a failed attempt.
async fn attempt_once<T, P>(processor: &P, item: T, limit: Option<Duration>) -> Result<(), String>
where
    P: Processor<T>,
{
    // The call happens inside the guarded future so a panic raised before
    // the first await is caught as well.
    let attempt = AssertUnwindSafe(async move { processor.process(item).await }).catch_unwind();

    let outcome = match limit {
        Some(limit) => match timeout(limit, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(format!("attempt timed out after {limit:?}")),
        },
        None => attempt.await,
    };

    match outcome {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(format!("attempt panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
