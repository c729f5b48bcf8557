//! Job Scheduling
//!
//! Decouples *when* state changes from *when* effects react. Invalidations
//! enqueue [`Job`]s; nothing re-runs until the queue is flushed. Hosts with
//! their own loop call [`flush`] (or [`flush_with_budget`] to bound each
//! slice); hosts on tokio spawn a [`FlushDriver`] and let it drain the queue
//! in the background.

mod driver;
mod queue;

pub use driver::{DriverInstalled, FlushDriver, FlushDriverBuilder, FlushDriverHandle};
pub use queue::{
    flush, flush_with_budget, is_flush_pending, pending_jobs, queue_job, FlushOutcome, Job, JobId,
};

#[cfg(test)]
pub(crate) use queue::test_support;
