//! Shared types for the pgsink ingestion service.
//!
//! Every crate in the workspace speaks in terms of [`WorkItem`] and reports
//! failures through the single [`Error`] enum defined here.

mod common;
pub use common::*;
