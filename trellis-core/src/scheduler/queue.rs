//! Job Queue
//!
//! Invalidated effects become jobs. Jobs wait here until someone drains the
//! queue: the host calling [`flush`], or an installed
//! [`FlushDriver`](super::FlushDriver) reacting to a wake signal.
//!
//! # Ordering and Dedup
//!
//! The queue is FIFO. Each job carries a shared `queued` flag; queueing a job
//! whose flag is already set is a no-op, so an effect triggered five times
//! before the next flush runs once. The flag is cleared *before* the job body
//! executes, which lets a trigger raised during the run queue the job again
//! for the next round.
//!
//! # Double Buffering
//!
//! Two buffers alternate: writers push into one while the flush drains the
//! other, swapping when the read side empties. A full [`flush`] keeps
//! swapping until both are empty, so jobs queued mid-flush still run in the
//! same drain. [`flush_with_budget`] stops once a time slice is spent and
//! reports the remainder; the read cursor survives in the queue state, so a
//! later flush resumes exactly where the previous one yielded and FIFO order
//! holds across yields.
//!
//! # Failure Containment
//!
//! Each job runs under `catch_unwind`. A panicking job is reported to the
//! error sink and the drain moves on to the next job.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::{self, EngineError};

use super::driver;

/// Unique identifier for a job, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of deferred work with queue-membership dedup.
///
/// Jobs sharing a `queued` flag dedup against each other: the engine hands
/// every invalidation of one effect a job with that effect's flag, so at most
/// one entry per effect sits in the queue.
pub struct Job {
    id: JobId,
    queued: Arc<AtomicBool>,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    /// Create a job with its own fresh dedup flag.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_flag(Arc::new(AtomicBool::new(false)), f)
    }

    /// Create a job that dedups through an externally owned flag.
    pub(crate) fn with_flag<F>(queued: Arc<AtomicBool>, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: JobId::new(),
            queued,
            run: Arc::new(f),
        }
    }

    /// Get the job's unique ID.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Whether the job currently sits in the queue.
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }

    /// Run the body now, outside the queue.
    pub(crate) fn invoke(&self) {
        (self.run)();
    }
}

/// Clone shares the dedup flag and the body.
impl Clone for Job {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            queued: Arc::clone(&self.queued),
            run: Arc::clone(&self.run),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("queued", &self.is_queued())
            .finish()
    }
}

/// Result of [`flush_with_budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue is empty.
    Drained { jobs_run: usize },
    /// The budget ran out with jobs still pending.
    Yielded { jobs_run: usize, remaining: usize },
}

impl FlushOutcome {
    /// Jobs executed by this flush call.
    pub fn jobs_run(&self) -> usize {
        match self {
            Self::Drained { jobs_run } | Self::Yielded { jobs_run, .. } => *jobs_run,
        }
    }

    /// Whether the queue was fully drained.
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained { .. })
    }
}

struct QueueState {
    /// Double buffer. Writers push into `bufs[write]`; the flush drains the
    /// other one.
    bufs: [Vec<Job>; 2],
    write: usize,
    /// Cursor into the read buffer. Persists across budget yields.
    read_pos: usize,
    /// True while a flush call is draining; re-entrant flushes bail out.
    flushing: bool,
    /// True from the first queued job until a flush fully drains. Gates the
    /// driver wake so a burst of jobs sends one signal.
    flush_pending: bool,
}

impl QueueState {
    fn pending(&self) -> usize {
        let read = 1 - self.write;
        (self.bufs[read].len() - self.read_pos) + self.bufs[self.write].len()
    }
}

static QUEUE: OnceLock<Mutex<QueueState>> = OnceLock::new();

fn queue() -> &'static Mutex<QueueState> {
    QUEUE.get_or_init(|| {
        Mutex::new(QueueState {
            bufs: [Vec::new(), Vec::new()],
            write: 0,
            read_pos: 0,
            flushing: false,
            flush_pending: false,
        })
    })
}

/// Add a job to the queue, unless its dedup flag says it is already there.
///
/// The first job of a burst sends a wake to the installed flush driver;
/// without a driver, the host is expected to call [`flush`].
pub fn queue_job(job: Job) {
    if job.queued.swap(true, Ordering::SeqCst) {
        tracing::trace!(job = job.id.as_u64(), "job already queued, skipping");
        return;
    }

    let first_of_burst = {
        let mut state = queue().lock();
        let first = !state.flush_pending;
        state.flush_pending = true;
        let write = state.write;
        state.bufs[write].push(job);
        first
    };

    if first_of_burst {
        driver::wake();
    }
}

/// Number of jobs currently waiting.
pub fn pending_jobs() -> usize {
    queue().lock().pending()
}

/// Whether queued work exists that no flush has drained yet.
pub fn is_flush_pending() -> bool {
    queue().lock().flush_pending
}

/// Clears the flushing flag when the drain loop exits.
struct FlushingGuard;

impl Drop for FlushingGuard {
    fn drop(&mut self) {
        queue().lock().flushing = false;
    }
}

/// Drain the queue completely, including jobs queued while draining.
///
/// Returns the number of jobs executed. Re-entrant calls (a job calling
/// `flush` itself) return 0 immediately.
pub fn flush() -> usize {
    flush_inner(None).jobs_run()
}

/// Drain the queue until `budget` elapses, then yield.
///
/// The budget is checked between jobs; a single long job overshoots it.
/// Unprocessed jobs stay queued in order and the next flush call resumes
/// with them.
pub fn flush_with_budget(budget: Duration) -> FlushOutcome {
    flush_inner(Some(budget))
}

fn flush_inner(budget: Option<Duration>) -> FlushOutcome {
    {
        let mut state = queue().lock();
        if state.flushing {
            return FlushOutcome::Drained { jobs_run: 0 };
        }
        state.flushing = true;
        let pending = state.pending();
        if pending > 0 {
            tracing::trace!(pending, "flush begin");
        }
    }
    let _guard = FlushingGuard;

    let started = Instant::now();
    let mut jobs_run = 0usize;

    loop {
        // Fetch the next job under the lock, run it outside.
        let job = {
            let mut state = queue().lock();
            loop {
                let read = 1 - state.write;
                if state.read_pos < state.bufs[read].len() {
                    let job = state.bufs[read][state.read_pos].clone();
                    state.read_pos += 1;
                    break Some(job);
                }

                // Read side exhausted. Swap if writers queued more, else done.
                state.bufs[read].clear();
                state.read_pos = 0;
                if state.bufs[state.write].is_empty() {
                    state.flush_pending = false;
                    break None;
                }
                state.write = read;
            }
        };

        let Some(job) = job else {
            if jobs_run > 0 {
                tracing::trace!(jobs_run, "flush drained");
            }
            return FlushOutcome::Drained { jobs_run };
        };

        // Clear the dedup flag first: a trigger raised by the body itself
        // must be able to queue the job for the next round.
        job.queued.store(false, Ordering::SeqCst);

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (job.run)())) {
            errors::report(EngineError::JobPanicked {
                job: job.id.as_u64(),
                message: errors::panic_message(payload.as_ref()),
            });
        }
        jobs_run += 1;

        if let Some(budget) = budget {
            if started.elapsed() >= budget {
                let remaining = queue().lock().pending();
                if remaining > 0 {
                    tracing::debug!(jobs_run, remaining, "flush budget spent, yielding");
                    return FlushOutcome::Yielded { jobs_run, remaining };
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Test support
// ----------------------------------------------------------------------------


// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
