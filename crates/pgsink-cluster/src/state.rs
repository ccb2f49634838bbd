//! Coordinator-side bookkeeping as an explicit state machine.
//!
//! [`Coordinator::handle`] consumes one [`FleetEvent`] at a time and returns
//! the [`Action`]s the control loop must carry out. It never touches a process,
//! a signal or a clock itself, which keeps every transition testable.
//!
//! ## Invariants
//! - `active_workers` only goes down on exit and never below zero.
//! - A shutdown starts at most once; later requests produce no actions.
//! - Any non-zero (or missing) exit code observed during a shutdown makes the
//!   final exit code unclean.

use std::collections::BTreeMap;

/// Process exit code for a fully clean shutdown.
pub const CLEAN_EXIT: i32 = 0;
/// Process exit code when any worker, or the stop sequence itself, failed.
pub const UNCLEAN_EXIT: i32 = 1;

/// Lifecycle notifications delivered to the coordinator's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A worker process was started.
    Forked { pid: u32 },
    /// A worker reported that its listener is bound.
    Listening { pid: u32 },
    /// A worker process terminated. `code` is `None` when it was killed by a
    /// signal.
    Exited { pid: u32, code: Option<i32> },
    /// The coordinator received a termination signal.
    ShutdownRequested { signal: &'static str },
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a termination signal to each pid.
    Terminate(Vec<u32>),
    /// Start the forced-exit timer.
    ArmTimer,
    /// Stop the forced-exit timer.
    CancelTimer,
    /// Exit the coordinator with this code.
    Exit(i32),
}

/// Coordinator view of one forked worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: u32,
    pub is_listening: bool,
}

/// Process-wide shutdown flags, owned by the coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownState {
    pub in_progress: bool,
    pub active_workers: usize,
    pub all_workers_exited_cleanly: bool,
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self {
            in_progress: false,
            active_workers: 0,
            all_workers_exited_cleanly: true,
        }
    }
}

impl ShutdownState {
    pub const fn exit_code(&self) -> i32 {
        if self.all_workers_exited_cleanly {
            CLEAN_EXIT
        } else {
            UNCLEAN_EXIT
        }
    }
}

#[derive(Debug, Default)]
pub struct Coordinator {
    shutdown: ShutdownState,
    workers: BTreeMap<u32, WorkerRecord>,
    listening: usize,
    timer_armed: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn shutdown(&self) -> &ShutdownState {
        &self.shutdown
    }

    pub fn worker(&self, pid: u32) -> Option<&WorkerRecord> {
        self.workers.get(&pid)
    }

    /// Workers that reported a bound listener and have not exited.
    pub const fn listening(&self) -> usize {
        self.listening
    }

    pub fn handle(&mut self, event: FleetEvent) -> Vec<Action> {
        match event {
            FleetEvent::Forked { pid } => {
                self.on_forked(pid);
                Vec::new()
            }
            FleetEvent::Listening { pid } => {
                self.on_listening(pid);
                Vec::new()
            }
            FleetEvent::Exited { pid, code } => self.on_exited(pid, code),
            FleetEvent::ShutdownRequested { signal } => self.on_shutdown_requested(signal),
        }
    }

    /// The forced-exit timer fired before the fleet emptied.
    pub fn on_timeout(&mut self) -> Vec<Action> {
        self.timer_armed = false;
        tracing::warn!(
            "Cluster graceful shutdown: timeout with {} workers left, force exit.",
            self.shutdown.active_workers
        );
        vec![Action::Exit(self.shutdown.exit_code())]
    }

    fn on_forked(&mut self, pid: u32) {
        self.shutdown.active_workers += 1;
        self.workers.insert(
            pid,
            WorkerRecord {
                pid,
                is_listening: false,
            },
        );
        tracing::info!("Cluster: worker {pid} started.");
    }

    fn on_listening(&mut self, pid: u32) {
        match self.workers.get_mut(&pid) {
            Some(record) if !record.is_listening => {
                record.is_listening = true;
                self.listening += 1;
                tracing::info!(
                    "Cluster: worker {pid} listening ({}/{} ready).",
                    self.listening,
                    self.shutdown.active_workers
                );
            }
            Some(_) => {}
            None => tracing::warn!("Cluster: readiness from unknown worker {pid}"),
        }
    }

    fn on_exited(&mut self, pid: u32, code: Option<i32>) -> Vec<Action> {
        let Some(record) = self.workers.remove(&pid) else {
            tracing::warn!("Cluster: exit of unknown worker {pid}");
            return Vec::new();
        };

        match code {
            Some(code) => tracing::info!("worker {pid} exited with code {code}"),
            None => tracing::info!("worker {pid} was terminated by a signal"),
        }

        if record.is_listening {
            self.listening -= 1;
        }
        self.shutdown.active_workers = self.shutdown.active_workers.saturating_sub(1);
        if self.shutdown.in_progress && code != Some(CLEAN_EXIT) {
            self.shutdown.all_workers_exited_cleanly = false;
        }

        self.check_all_exited()
    }

    fn on_shutdown_requested(&mut self, signal: &'static str) -> Vec<Action> {
        if self.shutdown.in_progress {
            tracing::debug!("Got {signal}, shutdown already in progress");
            return Vec::new();
        }

        self.shutdown.in_progress = true;
        self.shutdown.all_workers_exited_cleanly = true;
        tracing::info!("Got {signal} on coordinator. Graceful shutdown start.");

        let actions = self.check_all_exited();
        if !actions.is_empty() {
            return actions;
        }

        self.timer_armed = true;
        vec![
            Action::ArmTimer,
            Action::Terminate(self.workers.keys().copied().collect()),
        ]
    }

    fn check_all_exited(&mut self) -> Vec<Action> {
        let active = self.shutdown.active_workers;
        if active > 0 {
            if self.shutdown.in_progress {
                let suffix = if active > 1 { "s" } else { "" };
                tracing::info!("Cluster graceful shutdown: wait {active} worker{suffix}.");
            }
            return Vec::new();
        }

        if self.shutdown.in_progress {
            tracing::info!("Cluster graceful shutdown: done.");
        } else {
            tracing::warn!("Cluster: every worker exited without a shutdown request.");
        }
        let mut actions = Vec::with_capacity(2);
        if self.timer_armed {
            self.timer_armed = false;
            actions.push(Action::CancelTimer);
        }
        actions.push(Action::Exit(self.shutdown.exit_code()));
        actions
    }
}
