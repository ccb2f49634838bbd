//! Bounded-concurrency work queue with retries and health-gated dispatch.
//!
//! A [`WorkQueue`] buffers items in memory and hands them to a [`Processor`],
//! never running more than [`QueueConfig::concurrency`] items at once. Failed
//! items are retried in place after [`QueueConfig::retry_delay`] and dropped
//! once their retries are exhausted, which is reported as a
//! [`QueueEvent::Failed`]. A separate poller refreshes the cached health state
//! from a [`HealthCheck`]; while it reads unhealthy no item leaves the buffer.
//!
//! ## Structure
//!
//! - [`queue`] - the cloneable [`WorkQueue`] handle.
//! - `dispatcher` - the single task that owns the buffer and in-flight set.
//! - `health` - the single task that writes the health state.
//! - [`event`] - the broadcast bus carrying [`QueueEvent`]s.
//!
//! The queue is lossy by construction: nothing is persisted and items still
//! buffered when the process dies are gone.

mod config;
mod dispatcher;
pub mod event;
mod health;
mod processor;
pub mod queue;

pub use config::QueueConfig;
pub use event::{Bus, QueueEvent};
pub use processor::{HealthCheck, Processor};
pub use queue::WorkQueue;
