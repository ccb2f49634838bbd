//! OS termination signals as channel messages.
//!
//! Signal handlers only forward a signal name into a channel; all reactions
//! happen in the single control loop that owns the receiver. This keeps the
//! shutdown logic free of re-entrancy.
//!
//! ## Signals
//! **Unix platforms:** `SIGTERM` and `SIGINT`.
//!
//! **Windows platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].

use pgsink_core::{Error, Result};
use tokio::sync::mpsc;

/// Installs the termination signal handlers and forwards every received
/// signal, mapped through `wrap`, into `tx` until the receiver is dropped.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after the call is not lost.
///
/// # Errors
///
/// Returns [`Error::Signal`] if a handler cannot be registered.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
#[cfg(unix)]
pub fn forward_shutdown_signals<T>(
    tx: mpsc::UnboundedSender<T>,
    wrap: fn(&'static str) -> T,
) -> Result<()>
where
    T: Send + 'static,
{
    use tokio::signal::unix::{SignalKind, signal};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| Error::Signal {
            reason: format!("failed to install handler: {e}"),
        })
    };
    let mut sigterm = install(SignalKind::terminate())?;
    let mut sigint = install(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => break,
            };
            if tx.send(wrap(name)).is_err() {
                break;
            }
        }
    });

    Ok(())
}

/// Installs the termination signal handlers and forwards every received
/// signal, mapped through `wrap`, into `tx` until the receiver is dropped.
#[cfg(not(unix))]
pub fn forward_shutdown_signals<T>(
    tx: mpsc::UnboundedSender<T>,
    wrap: fn(&'static str) -> T,
) -> Result<()>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(wrap("Ctrl-C")).is_err() {
                break;
            }
        }
    });

    Ok(())
}
