//! Worker side of the fleet: readiness and the stop sequence.

use crate::state::{CLEAN_EXIT, UNCLEAN_EXIT};
use core::{fmt, future::Future};
use std::io::Write;
use tokio::sync::mpsc;

/// Line a worker prints on stdout once it accepts connections.
pub const READY_MARKER: &str = "\u{1}pgsink:worker-listening";

/// Tells the coordinator this worker's listener is bound.
pub fn notify_listening() {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{READY_MARKER}").and_then(|()| stdout.flush()) {
        tracing::warn!("Failed to report readiness: {e}");
    }
}

/// Worker-local shutdown flag. The stop sequence runs at most once.
#[derive(Debug, Default)]
pub struct WorkerShutdown {
    in_progress: bool,
}

impl WorkerShutdown {
    /// Returns `true` for the first call only.
    pub fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.in_progress, true)
    }

    pub const fn in_progress(&self) -> bool {
        self.in_progress
    }
}

/// Runs one worker from bootstrap to exit code.
///
/// `main` brings the worker up and yields whatever `stop` needs to bring it
/// down. The first signal received on `signals` starts `stop`; signals that
/// arrive while it runs are logged and ignored.
///
/// Returns [`CLEAN_EXIT`] if `stop` succeeds and [`UNCLEAN_EXIT`] if either
/// `main` or `stop` fails.
pub async fn drive_worker<R, E, S, SF, SE>(
    main: impl Future<Output = Result<R, E>>,
    stop: S,
    mut signals: mpsc::UnboundedReceiver<&'static str>,
) -> i32
where
    E: fmt::Display,
    S: FnOnce(R) -> SF,
    SF: Future<Output = Result<(), SE>>,
    SE: fmt::Display,
{
    let runtime = match main.await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Worker bootstrap failed: {e}");
            return UNCLEAN_EXIT;
        }
    };

    let mut shutdown = WorkerShutdown::default();
    let Some(signal) = signals.recv().await else {
        // Nobody can ask us to stop anymore; keep serving.
        return std::future::pending().await;
    };
    shutdown.begin();
    tracing::info!("Got {signal} on worker {}. Graceful shutdown start.", std::process::id());

    let stop = stop(runtime);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            result = &mut stop => {
                return match result {
                    Ok(()) => {
                        tracing::info!("worker process {} - shutdown successful", std::process::id());
                        CLEAN_EXIT
                    }
                    Err(e) => {
                        tracing::error!("Worker shutdown failed: {e}");
                        UNCLEAN_EXIT
                    }
                };
            }
            Some(signal) = signals.recv() => {
                if !shutdown.begin() {
                    tracing::debug!("Got {signal}, shutdown already in progress");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn shutdown_flag_is_set_once() {
        let mut shutdown = WorkerShutdown::default();
        assert!(!shutdown.in_progress());
        assert!(shutdown.begin());
        assert!(!shutdown.begin());
        assert!(shutdown.in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signals_run_stop_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send("SIGTERM").unwrap();
        tx.send("SIGINT").unwrap();
        tx.send("SIGTERM").unwrap();

        let code = drive_worker(
            async { Ok::<_, String>(counter) },
            |counter: Arc<AtomicUsize>| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<(), String>(())
            },
            rx,
        )
        .await;

        assert_eq!(code, CLEAN_EXIT);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_stop_exits_unclean() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("SIGTERM").unwrap();

        let code = drive_worker(
            async { Ok::<(), String>(()) },
            |()| async { Err::<(), _>("pool close failed") },
            rx,
        )
        .await;

        assert_eq!(code, UNCLEAN_EXIT);
    }

    #[tokio::test]
    async fn failing_bootstrap_exits_unclean_without_stop() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stopped);
        let (_tx, rx) = mpsc::unbounded_channel();

        let code = drive_worker(
            async { Err::<(), _>("store unreachable") },
            move |()| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            },
            rx,
        )
        .await;

        assert_eq!(code, UNCLEAN_EXIT);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
    }
}
