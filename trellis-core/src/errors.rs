//! Error Types and the Error Sink
//!
//! The engine never unwinds a panic out of a flush or a batch replay. A panic
//! raised by user code (an effect body, a watch callback, a computed getter) is
//! caught at the per-job boundary in the scheduler and at the per-trigger
//! boundary in the batch drain, converted into an [`EngineError`], and handed
//! to the error sink. Sibling jobs and triggers keep running.
//!
//! # The Error Sink
//!
//! The sink is a process-wide callback. The default sink logs through
//! `tracing::error!`. Hosts that want to surface errors elsewhere (a dev
//! overlay, a crash reporter) replace it with [`set_error_sink`].
//!
//! State mutated before the panic stays mutated. There is no rollback and no
//! retry; the failing computation simply waits for its next trigger.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use thiserror::Error;

/// An error caught at one of the engine's isolation boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A scheduled job panicked while the queue was being flushed.
    #[error("job {job} panicked during flush: {message}")]
    JobPanicked {
        /// Identifier of the failing job.
        job: u64,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A deferred trigger panicked while a batch was being replayed.
    #[error("trigger for key {key} panicked during batch replay: {message}")]
    TriggerPanicked {
        /// The key whose notification failed.
        key: String,
        /// The panic payload, when it was a string.
        message: String,
    },
}

/// Callback receiving every [`EngineError`] the engine catches.
pub type ErrorSink = Arc<dyn Fn(&EngineError) + Send + Sync>;

static ERROR_SINK: OnceLock<RwLock<ErrorSink>> = OnceLock::new();

fn sink_slot() -> &'static RwLock<ErrorSink> {
    ERROR_SINK.get_or_init(|| {
        RwLock::new(Arc::new(|err: &EngineError| {
            tracing::error!(error = %err, "reactive engine caught an error");
        }) as ErrorSink)
    })
}

/// Replace the process-wide error sink.
///
/// The previous sink is dropped; errors reported from this point on go to
/// `sink`.
pub fn set_error_sink<F>(sink: F)
where
    F: Fn(&EngineError) + Send + Sync + 'static,
{
    *sink_slot().write() = Arc::new(sink);
}

/// Report an error to the current sink.
pub(crate) fn report(err: EngineError) {
    // Clone the sink out so a sink that reports errors itself cannot deadlock
    // on the slot lock.
    let sink = Arc::clone(&*sink_slot().read());
    sink(&err);
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_str_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new("formatted boom".to_string());
        assert_eq!(panic_message(payload.as_ref()), "formatted boom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn engine_error_displays_job_and_message() {
        let err = EngineError::JobPanicked {
            job: 7,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "job 7 panicked during flush: boom");
    }
}
