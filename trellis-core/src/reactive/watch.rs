//! Watch
//!
//! A watch re-evaluates a getter when its dependencies change and calls
//! back with the new and previous results when they differ.
//!
//! # How Watches Work
//!
//! 1. Creation runs the getter once inside a lazy effect to capture the
//!    baseline and the dependency set. With `immediate`, the callback also
//!    fires right away (with no previous value).
//!
//! 2. A dependency trigger does not re-run the getter inline. It enqueues
//!    the watch job; triggers between flushes coalesce into one job run.
//!
//! 3. The job re-runs the getter, compares against the previous result with
//!    `PartialEq`, and on change invokes the callback with
//!    `(new, old, cleanup registrar)`.
//!
//! 4. With `deep`, the getter result is walked by [`deep_track`] so nested
//!    mutations re-trigger the watch, and the callback fires on every
//!    trigger: old and new can share structure, so the shallow compare
//!    cannot be trusted to see nested changes.
//!
//! Cleanups registered by one callback run before the next callback and at
//! [`WatchHandle::dispose`].

use std::sync::Arc;

use parking_lot::Mutex;

use super::deep::{deep_track, DeepTrack};
use super::effect::{self, Effect, EffectOptions};
use crate::scheduler::{queue_job, Job};

/// Construction options for [`watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Fire the callback once at creation, with no previous value.
    pub immediate: bool,
    /// Walk the getter result, subscribing to nested containers, and fire
    /// on every trigger.
    pub deep: bool,
}

impl WatchOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            deep: false,
        }
    }

    pub fn deep() -> Self {
        Self {
            immediate: false,
            deep: true,
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Registrar handed to the watch callback. Registered closures run before
/// the next callback invocation, or at disposal, whichever comes first.
pub struct OnCleanup {
    slot: Arc<Mutex<Vec<Cleanup>>>,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        self.slot.lock().push(Box::new(f));
    }
}

/// Disposer for an active watch.
pub struct WatchHandle {
    source: Effect,
    cleanups: Arc<Mutex<Vec<Cleanup>>>,
}

impl WatchHandle {
    /// Stop watching and run any pending cleanups. Idempotent. A watch job
    /// already sitting in the queue goes inert.
    pub fn dispose(&self) {
        self.source.kill();
        let pending: Vec<Cleanup> = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in pending {
            cleanup();
        }
    }

    /// Whether [`dispose`](Self::dispose) has not been called.
    pub fn is_active(&self) -> bool {
        self.source.is_active()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.source.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Watch a getter and call back when its result changes.
///
/// ```rust,ignore
/// let items = observe(vec![1, 2, 3]);
///
/// let handle = watch(
///     {
///         let items = items.clone();
///         move || items.len()
///     },
///     |new_len, old_len, _cleanup| {
///         println!("{old_len:?} -> {new_len}");
///     },
///     WatchOptions::default(),
/// );
///
/// items.push(4); // after the next flush: "Some(3) -> 4"
/// handle.dispose();
/// ```
pub fn watch<V, G, C>(getter: G, callback: C, options: WatchOptions) -> WatchHandle
where
    V: Clone + PartialEq + DeepTrack + Send + Sync + 'static,
    G: Fn() -> V + Send + Sync + 'static,
    C: Fn(&V, Option<&V>, &OnCleanup) + Send + Sync + 'static,
{
    let deep = options.deep;

    // Handoff slot from the tracked getter run to the comparing job.
    let next: Arc<Mutex<Option<V>>> = Arc::new(Mutex::new(None));
    let prev: Arc<Mutex<Option<V>>> = Arc::new(Mutex::new(None));
    let cleanups: Arc<Mutex<Vec<Cleanup>>> = Arc::new(Mutex::new(Vec::new()));

    // The invalidation hook needs the job, the job needs the effect; the
    // slot is filled once both exist.
    let job_slot: Arc<Mutex<Option<Job>>> = Arc::new(Mutex::new(None));

    let source = Effect::with_options(
        {
            let next = Arc::clone(&next);
            move || {
                let value = getter();
                if deep {
                    deep_track(&value);
                }
                *next.lock() = Some(value);
            }
        },
        EffectOptions {
            lazy: true,
            on_invalidate: Some(Box::new({
                let job_slot = Arc::clone(&job_slot);
                move |_effect| {
                    if let Some(job) = job_slot.lock().clone() {
                        queue_job(job);
                    }
                }
            })),
        },
    );

    // The job holds the effect by ID only, so a disposed watch leaves no
    // live cycle and a queued job goes inert after dispose.
    let source_id = source.id();
    let job = Job::new({
        let next = Arc::clone(&next);
        let prev = Arc::clone(&prev);
        let cleanups = Arc::clone(&cleanups);
        move || {
            let Some(source) = effect::lookup(source_id) else {
                return;
            };
            source.run();

            let Some(new_value) = next.lock().take() else {
                return;
            };

            let old_value = prev.lock().clone();
            let changed = match &old_value {
                Some(old) => deep || new_value != *old,
                None => true,
            };

            if changed {
                let pending: Vec<Cleanup> = std::mem::take(&mut *cleanups.lock());
                for cleanup in pending {
                    cleanup();
                }
                let registrar = OnCleanup {
                    slot: Arc::clone(&cleanups),
                };
                callback(&new_value, old_value.as_ref(), &registrar);
            }

            *prev.lock() = Some(new_value);
        }
    });
    *job_slot.lock() = Some(job.clone());

    if options.immediate {
        // First delivery now: getter, then callback with no old value
        job.invoke();
    } else {
        // Capture the baseline silently
        source.run();
        *prev.lock() = next.lock().take();
    }

    WatchHandle { source, cleanups }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
