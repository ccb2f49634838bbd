//! Coordinator/worker process fleet with graceful, bounded-time shutdown.
//!
//! One coordinator process starts N workers (copies of the same executable),
//! tracks their readiness and exits, and turns a termination signal into a
//! fleet-wide graceful shutdown:
//!
//! 1. The coordinator marks the shutdown as started, arms a forced-exit timer
//!    and sends SIGTERM to every worker.
//! 2. Each worker runs its stop sequence once and exits with `0` on success or
//!    `1` on failure.
//! 3. The coordinator exits as soon as the last worker is gone, with `0` only
//!    if every worker exited cleanly. If the timer fires first it exits right
//!    away with what it has observed so far.
//!
//! ## Structure
//!
//! - [`cluster`] - [`Cluster`], the entry point, and the coordinator loop.
//! - [`state`] - the coordinator state machine.
//! - [`fleet`] - spawning and signalling worker processes.
//! - [`worker`] - readiness notification and the worker stop sequence.
//! - [`signals`] - OS signals forwarded as channel messages.
//! - [`role`] - coordinator or worker detection.
//!
//! No memory is shared between processes; coordination happens only through
//! signals, a readiness line on the worker's stdout and exit codes.

pub mod cluster;
pub mod fleet;
pub mod role;
pub mod signals;
pub mod state;
pub mod worker;

pub use cluster::{
    Cluster, ClusterConfig, DEFAULT_MAX_WORKERS, DEFAULT_SHUTDOWN_TIMEOUT, default_worker_count,
};
pub use fleet::{Fleet, ProcessFleet};
pub use role::{Role, WORKER_ID_ENV};
pub use state::{CLEAN_EXIT, Coordinator, FleetEvent, UNCLEAN_EXIT};
pub use worker::{WorkerShutdown, drive_worker, notify_listening};

#[cfg(test)]
mod tests;
