//! Starting, watching and signalling worker processes.
//!
//! A worker is the current executable started again with
//! [`WORKER_ID_ENV`](crate::role::WORKER_ID_ENV) set. Each child gets a monitor
//! task that turns its readiness marker into [`FleetEvent::Listening`], copies
//! the rest of its stdout to ours, and reports [`FleetEvent::Exited`] once the
//! process is gone.

use crate::{role::WORKER_ID_ENV, state::FleetEvent, worker::READY_MARKER};
use pgsink_core::{Error, Result};
use std::{ffi::OsString, path::PathBuf, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdout, Command},
    sync::mpsc,
};

/// Something that can start and stop workers.
///
/// [`ProcessFleet`] is the real implementation; the control loop only sees this
/// trait so it can be driven without spawning processes.
pub trait Fleet: Send {
    /// Starts worker number `index` and returns its pid. Readiness and exit
    /// must later be reported through `events`.
    fn spawn(&mut self, index: usize, events: mpsc::UnboundedSender<FleetEvent>) -> Result<u32>;

    /// Asks worker `pid` to shut down gracefully.
    fn terminate(&mut self, pid: u32) -> Result<()>;
}

/// Workers as child processes of the current executable.
#[derive(Debug, Clone)]
pub struct ProcessFleet {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessFleet {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = OsString>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Re-runs this executable with the same arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the path of the running executable cannot
    /// be resolved.
    pub fn current() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| Error::Spawn {
            reason: format!("cannot resolve current executable: {e}"),
        })?;
        Ok(Self::new(program, std::env::args_os().skip(1)))
    }
}

impl Fleet for ProcessFleet {
    fn spawn(&mut self, index: usize, events: mpsc::UnboundedSender<FleetEvent>) -> Result<u32> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ID_ENV, index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Spawn {
                reason: format!("worker {index}: {e}"),
            })?;

        let pid = child.id().ok_or_else(|| Error::Spawn {
            reason: format!("worker {index} exited before reporting a pid"),
        })?;
        let stdout = child.stdout.take();

        tokio::spawn(monitor(pid, child, stdout, events));
        Ok(pid)
    }

    #[cfg(unix)]
    fn terminate(&mut self, pid: u32) -> Result<()> {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        let raw = i32::try_from(pid).map_err(|_| Error::Signal {
            reason: format!("pid {pid} out of range"),
        })?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| Error::Signal {
            reason: format!("SIGTERM to {pid}: {e}"),
        })
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, pid: u32) -> Result<()> {
        Err(Error::Signal {
            reason: format!("cannot signal worker {pid} on this platform"),
        })
    }
}

async fn monitor(
    pid: u32,
    mut child: Child,
    stdout: Option<ChildStdout>,
    events: mpsc::UnboundedSender<FleetEvent>,
) {
    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        let mut out = tokio::io::stdout();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line == READY_MARKER => {
                    let _ = events.send(FleetEvent::Listening { pid });
                }
                Ok(Some(mut line)) => {
                    line.push('\n');
                    if out.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Lost stdout of worker {pid}: {e}");
                    break;
                }
            }
        }
        let _ = out.flush().await;
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::error!("Failed to wait for worker {pid}: {e}");
            None
        }
    };
    let _ = events.send(FleetEvent::Exited { pid, code });
}
