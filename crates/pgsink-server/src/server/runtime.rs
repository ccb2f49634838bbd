//! One worker: the shared listener, the HTTP router, the queue and the store.
//!
//! [`WorkerRuntime::stop`] tears the pieces down in a fixed order. The
//! listener goes first so nothing new is accepted, then the queue drains
//! everything it already accepted, and only then is the pool closed.

use crate::server::{
    config::ServerConfig,
    gateway::{PersistenceGateway, PgGateway},
    service::handler::IngestService,
    telemetry,
};
use anyhow::Context;
use core::future::IntoFuture;
use pgsink_cluster::notify_listening;
use pgsink_core::{Error, WorkItem};
use pgsink_queue::{QueueConfig, QueueEvent, WorkQueue};
use std::{io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    net::{TcpListener, TcpSocket},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const LISTEN_BACKLOG: u32 = 1024;

pub struct WorkerRuntime<G> {
    gateway: Arc<G>,
    queue: WorkQueue<WorkItem>,
    local_addr: SocketAddr,
    stop_listening: CancellationToken,
    server: JoinHandle<io::Result<()>>,
    events: JoinHandle<()>,
}

impl WorkerRuntime<PgGateway> {
    /// Connects to Postgres, binds the shared port and starts serving, then
    /// reports readiness to the coordinator.
    ///
    /// # Errors
    ///
    /// Fails if the store is unreachable or the port cannot be bound.
    pub async fn start(config: &ServerConfig) -> anyhow::Result<Self> {
        let gateway = PgGateway::init(&config.store)
            .await
            .context("Postgres is unreachable")?;
        let listener = bind_shared(config.addr)
            .with_context(|| format!("Failed to bind {}", config.addr))?;

        let runtime = Self::serve(
            Arc::new(gateway),
            listener,
            config.queue.clone(),
            config.max_body_bytes,
        )?;
        tracing::info!("Listening on {}", runtime.local_addr);
        notify_listening();
        Ok(runtime)
    }
}

impl<G: PersistenceGateway> WorkerRuntime<G> {
    /// Starts the queue and the HTTP server on an already bound `listener`.
    ///
    /// # Errors
    ///
    /// Fails if the listener has no local address.
    pub fn serve(
        gateway: Arc<G>,
        listener: TcpListener,
        queue: QueueConfig,
        max_body_bytes: usize,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;

        let persist = {
            let gateway = Arc::clone(&gateway);
            move |item: WorkItem| {
                let gateway = Arc::clone(&gateway);
                async move {
                    let started = Instant::now();
                    let result = gateway.save(&item).await;
                    telemetry::record_persist_duration(started.elapsed().as_secs_f64() * 1000.0);
                    result
                }
            }
        };
        let probe = {
            let gateway = Arc::clone(&gateway);
            move || {
                let gateway = Arc::clone(&gateway);
                async move { gateway.probe().await }
            }
        };

        let queue = WorkQueue::new(queue, persist, probe);
        let events = tokio::spawn(log_queue_events(queue.subscribe()).in_current_span());

        let stop_listening = CancellationToken::new();
        let router = IngestService::new(queue.clone()).router(max_body_bytes);
        let server = tokio::spawn(
            axum::serve(listener, router)
                .with_graceful_shutdown(stop_listening.clone().cancelled_owned())
                .into_future()
                .in_current_span(),
        );

        Ok(Self {
            gateway,
            queue,
            local_addr,
            stop_listening,
            server,
            events,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub const fn queue(&self) -> &WorkQueue<WorkItem> {
        &self.queue
    }

    /// Stops accepting requests, drains the queue and closes the store.
    ///
    /// Every step runs even if an earlier one failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerStop`] if the HTTP server did not shut down
    /// cleanly.
    pub async fn stop(self) -> pgsink_core::Result<()> {
        tracing::info!("Closing HTTP listener...");
        self.stop_listening.cancel();
        let served = match self.server.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::WorkerStop {
                reason: format!("HTTP server: {e}"),
            }),
            Err(e) => Err(Error::WorkerStop {
                reason: format!("HTTP server task: {e}"),
            }),
        };
        tracing::info!("HTTP listener closed.");

        tracing::info!("Draining queue ({} items left)...", self.queue.len());
        self.queue.close().await;
        if let Err(e) = self.events.await {
            tracing::warn!("Queue event logger ended abnormally: {e}");
        }
        tracing::info!("Queue drained.");

        self.gateway.close().await;
        served
    }
}

/// Binds `addr` with `SO_REUSEPORT` so every worker can listen on the same
/// port and the kernel spreads connections between them.
pub fn bind_shared(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Turns queue events into log lines and metrics until the queue is drained.
async fn log_queue_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(QueueEvent::Processed { .. }) => telemetry::increment_persisted(),
            Ok(QueueEvent::Retrying { attempt, error }) => {
                telemetry::increment_retried();
                tracing::warn!("Attempt {attempt} failed, retrying: {error}");
            }
            Ok(QueueEvent::Failed { attempts, error }) => {
                telemetry::increment_dropped();
                tracing::error!("Task failed after {attempts} attempts, dropping item: {error}");
            }
            Ok(QueueEvent::GateClosed) => {
                tracing::warn!("Store unhealthy, pausing the queue");
            }
            Ok(QueueEvent::GateOpened) => tracing::info!("Store healthy, resuming the queue"),
            Ok(QueueEvent::HealthChanged { healthy }) => {
                tracing::info!("Store health changed: healthy={healthy}");
            }
            Ok(QueueEvent::Drained) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Queue event logger skipped {skipped} events");
            }
        }
    }
}
