//! HTTP surface of a worker.
//!
//! ## Structure
//!
//! - [`handler`] - the axum router (`PUT /data`, `GET /health`).

pub mod handler;
