//! The fleet entry point and the coordinator control loop.

use crate::{
    fleet::{Fleet, ProcessFleet},
    role::Role,
    signals::forward_shutdown_signals,
    state::{Action, Coordinator, FleetEvent},
    worker::drive_worker,
};
use core::{fmt, future::Future, time::Duration};
use pgsink_core::Result;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};

/// Default upper bound on the number of worker processes.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Default time a shutdown may take before the coordinator exits anyway.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(100);

/// One worker per available CPU, at least one and at most `max`.
pub fn default_worker_count(max: usize) -> usize {
    num_cpus::get().min(max).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Number of worker processes the coordinator starts.
    pub workers: usize,
    /// Forced-exit deadline, measured from the shutdown request.
    pub shutdown_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(DEFAULT_MAX_WORKERS),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// A coordinator process with a fleet of identical workers.
///
/// The same executable plays both roles. [`Cluster::start`] checks the
/// [`Role`] of the current process: the coordinator spawns
/// [`ClusterConfig::workers`] copies of itself and supervises them, a worker
/// runs the supplied bootstrap and stop sequence.
///
/// On SIGTERM or SIGINT the coordinator forwards SIGTERM to every worker and
/// waits for all of them to exit, but never longer than
/// [`ClusterConfig::shutdown_timeout`]. The resulting exit code is `0` only if
/// every worker exited with `0`.
#[derive(Debug, Clone)]
pub struct Cluster {
    config: ClusterConfig,
}

impl Cluster {
    pub const fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Runs the current process in its `role` and returns its exit code.
    ///
    /// `worker_main` and `worker_stop` are only called in a worker.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed or the current
    /// executable cannot be resolved.
    pub async fn start<M, MF, R, E, S, SF, SE>(
        &self,
        role: Role,
        worker_main: M,
        worker_stop: S,
    ) -> Result<i32>
    where
        M: FnOnce() -> MF,
        MF: Future<Output = core::result::Result<R, E>>,
        E: fmt::Display,
        S: FnOnce(R) -> SF,
        SF: Future<Output = core::result::Result<(), SE>>,
        SE: fmt::Display,
    {
        match role {
            Role::Coordinator => self.run(ProcessFleet::current()?).await,
            Role::Worker { .. } => {
                let (tx, rx) = mpsc::unbounded_channel();
                forward_shutdown_signals(tx, |signal| signal)?;
                Ok(drive_worker(worker_main(), worker_stop, rx).await)
            }
        }
    }

    /// Starts the fleet and supervises it until the coordinator must exit.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn run<F: Fleet>(&self, fleet: F) -> Result<i32> {
        let (tx, rx) = mpsc::unbounded_channel();
        forward_shutdown_signals(tx.clone(), |signal| FleetEvent::ShutdownRequested {
            signal,
        })?;
        Ok(self.drive(fleet, tx, rx).await)
    }

    /// The coordinator control loop.
    ///
    /// Every input (fork results, readiness, exits, shutdown requests) arrives
    /// on `rx` and is applied to a single [`Coordinator`]; the forced-exit
    /// timer is the only other wake-up source.
    pub(crate) async fn drive<F: Fleet>(
        &self,
        mut fleet: F,
        tx: mpsc::UnboundedSender<FleetEvent>,
        mut rx: mpsc::UnboundedReceiver<FleetEvent>,
    ) -> i32 {
        let mut state = Coordinator::new();
        let mut deadline: Option<Instant> = None;

        tracing::info!("Setting {} workers...", self.config.workers);
        for index in 0..self.config.workers {
            match fleet.spawn(index, tx.clone()) {
                Ok(pid) => {
                    // Forks are applied before anything the worker reports.
                    state.handle(FleetEvent::Forked { pid });
                }
                Err(e) => tracing::error!("Failed to start worker {index}: {e}"),
            }
        }
        drop(tx);

        loop {
            let actions = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => state.handle(event),
                    None => {
                        tracing::error!("Cluster event channel closed");
                        return state.shutdown().exit_code();
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    state.on_timeout()
                }
            };

            for action in actions {
                match action {
                    Action::ArmTimer => {
                        deadline = Some(Instant::now() + self.config.shutdown_timeout);
                    }
                    Action::CancelTimer => deadline = None,
                    Action::Terminate(pids) => {
                        for pid in pids {
                            if let Err(e) = fleet.terminate(pid) {
                                tracing::warn!("Failed to signal worker {pid}: {e}");
                            }
                        }
                    }
                    Action::Exit(code) => {
                        tracing::info!("coordinator process {} - shutdown successful", std::process::id());
                        return code;
                    }
                }
            }
        }
    }
}
