//! Flush Driver
//!
//! A background tokio task that drains the job queue so hosts do not have to
//! call [`flush`](super::flush) by hand.
//!
//! The driver sleeps until [`queue_job`](super::queue_job) sends a wake, then
//! debounces briefly to let a burst of triggers coalesce, then drains the
//! queue in budgeted slices with a `yield_now` between them so it never
//! starves the rest of the runtime.
//!
//! ```rust,ignore
//! let driver = FlushDriver::builder()
//!     .debounce(Duration::from_millis(4))
//!     .budget(Duration::from_millis(16))
//!     .spawn()?;
//!
//! // ... reactive work; effects run without explicit flushes ...
//!
//! driver.shutdown().await;
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::queue::{flush, flush_with_budget, FlushOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeSignal {
    Flush,
    Shutdown,
}

// At most one driver is installed at a time. The slot empties again on
// shutdown so tests can spawn fresh drivers.
static WAKER: OnceLock<RwLock<Option<UnboundedSender<WakeSignal>>>> = OnceLock::new();

fn waker_slot() -> &'static RwLock<Option<UnboundedSender<WakeSignal>>> {
    WAKER.get_or_init(|| RwLock::new(None))
}

/// Nudge the installed driver, if any. Called by the queue on the first job
/// of a burst; a no-op without a driver.
pub(crate) fn wake() {
    let sender = waker_slot().read().clone();
    if let Some(sender) = sender {
        let _ = sender.send(WakeSignal::Flush);
    }
}

/// Error returned by [`FlushDriverBuilder::spawn`] when a driver is already
/// running.
#[derive(Debug, thiserror::Error)]
#[error("a flush driver is already installed")]
pub struct DriverInstalled;

/// Background task that flushes the job queue.
pub struct FlushDriver;

impl FlushDriver {
    /// Start configuring a driver.
    pub fn builder() -> FlushDriverBuilder {
        FlushDriverBuilder::default()
    }
}

/// Configuration for a [`FlushDriver`].
#[derive(Debug, Clone)]
pub struct FlushDriverBuilder {
    debounce: Duration,
    max_debounce: Duration,
    budget: Duration,
}

impl Default for FlushDriverBuilder {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(4),
            max_debounce: Duration::from_millis(16),
            budget: Duration::from_millis(16),
        }
    }
}

impl FlushDriverBuilder {
    /// Quiet window after a wake before flushing. Each additional wake inside
    /// the window restarts it.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Upper bound on total debounce delay under a constant trigger stream.
    pub fn max_debounce(mut self, max_debounce: Duration) -> Self {
        self.max_debounce = max_debounce;
        self
    }

    /// Time slice per drain pass before yielding to the runtime.
    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Install the driver and spawn its task on the current tokio runtime.
    pub fn spawn(self) -> Result<FlushDriverHandle, DriverInstalled> {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut slot = waker_slot().write();
            if slot.is_some() {
                return Err(DriverInstalled);
            }
            *slot = Some(tx.clone());
        }

        // Drain anything queued before the driver existed.
        let _ = tx.send(WakeSignal::Flush);

        tracing::debug!(
            debounce_ms = self.debounce.as_millis() as u64,
            max_debounce_ms = self.max_debounce.as_millis() as u64,
            budget_ms = self.budget.as_millis() as u64,
            "flush driver started"
        );

        let join = tokio::spawn(drive(rx, self));

        Ok(FlushDriverHandle { sender: tx, join })
    }
}

/// Handle controlling a running driver.
pub struct FlushDriverHandle {
    sender: UnboundedSender<WakeSignal>,
    join: JoinHandle<()>,
}

impl FlushDriverHandle {
    /// Stop the driver. Pending jobs are drained before the task exits, and
    /// the waker slot is freed for a future driver.
    pub async fn shutdown(self) {
        let _ = self.sender.send(WakeSignal::Shutdown);
        let _ = self.join.await;
        *waker_slot().write() = None;
        tracing::debug!("flush driver stopped");
    }
}

async fn drive(mut rx: UnboundedReceiver<WakeSignal>, config: FlushDriverBuilder) {
    'main: loop {
        match rx.recv().await {
            Some(WakeSignal::Flush) => {}
            Some(WakeSignal::Shutdown) | None => break,
        }

        // Debounce: wait for the trigger burst to go quiet, but never longer
        // than max_debounce in total.
        let deadline = Instant::now() + config.max_debounce;
        loop {
            let quiet = tokio::time::sleep(config.debounce);
            tokio::pin!(quiet);
            tokio::select! {
                _ = &mut quiet => break,
                signal = rx.recv() => match signal {
                    Some(WakeSignal::Flush) => {
                        if Instant::now() >= deadline {
                            break;
                        }
                    }
                    Some(WakeSignal::Shutdown) | None => break 'main,
                },
            }
        }

        // Drain in slices, yielding between them.
        loop {
            match flush_with_budget(config.budget) {
                FlushOutcome::Drained { jobs_run } => {
                    if jobs_run > 0 {
                        tracing::trace!(jobs_run, "driver drained queue");
                    }
                    break;
                }
                FlushOutcome::Yielded { jobs_run, remaining } => {
                    tracing::debug!(jobs_run, remaining, "driver yielding mid-drain");
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    flush();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{queue_job, test_support, Job};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn wait_for(counter: &Arc<AtomicUsize>, target: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < target && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn driver_flushes_queued_jobs() {
        let _serial = test_support::serial();

        let driver = FlushDriver::builder()
            .debounce(Duration::from_millis(1))
            .max_debounce(Duration::from_millis(4))
            .spawn()
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            queue_job(Job::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        wait_for(&counter, 1).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn second_driver_is_rejected_until_shutdown() {
        let _serial = test_support::serial();

        let driver = FlushDriver::builder().spawn().unwrap();
        assert!(FlushDriver::builder().spawn().is_err());

        driver.shutdown().await;

        let replacement = FlushDriver::builder().spawn().unwrap();
        replacement.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_pending_jobs() {
        let _serial = test_support::serial();

        let driver = FlushDriver::builder()
            // Long debounce so the drain happens on the shutdown path
            .debounce(Duration::from_secs(5))
            .max_debounce(Duration::from_secs(5))
            .spawn()
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            queue_job(Job::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        driver.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
