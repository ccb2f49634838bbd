//! Error types for the ingestion service.
//!
//! This module defines the central `Error` enum, which captures all recoverable
//! and reportable error cases across the queue, the process orchestrator and
//! the HTTP layer. It implements [`IntoResponse`] so handlers can return it
//! directly and clients see an appropriate status code.
//!
//! ## Error Cases
//! - `QueueClosed`: An item arrived after the queue started draining.
//! - `QueueFull`: The optional queue capacity was reached.
//! - `Persistence`: The store rejected or failed a write.
//! - `Spawn`: A worker process could not be started.
//! - `Signal`: Signal handlers could not be installed or delivered.
//! - `WorkerStop`: The worker stop sequence failed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the ingestion service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The queue no longer admits items.
    #[error("Queue is closed")]
    QueueClosed,

    /// The queue holds `capacity` items already.
    #[error("Queue is full ({capacity} items)")]
    QueueFull { capacity: usize },

    /// Writing to the relational store failed.
    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    /// A worker process could not be spawned.
    #[error("Failed to spawn worker: {reason}")]
    Spawn { reason: String },

    /// Installing or delivering an OS signal failed.
    #[error("Signal error: {reason}")]
    Signal { reason: String },

    /// The worker stop sequence reported a failure.
    #[error("Worker stop failed: {reason}")]
    WorkerStop { reason: String },
}

impl Error {
    /// Status code reported to HTTP clients for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueClosed | Self::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
