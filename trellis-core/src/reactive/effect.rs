//! Effect Implementation
//!
//! An Effect is a re-runnable computation whose dependencies are tracked
//! while it executes.
//!
//! # Lifecycle
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies (unless constructed lazy).
//!
//! 2. When a tracked key changes, the effect is invalidated: queued on the
//!    job scheduler, or handed to its custom invalidation hook if it has one.
//!
//! 3. Before re-running, the effect clears its old dependency edges and
//!    tracks new ones during execution, so stale subscriptions never linger.
//!
//! 4. `kill()` removes the effect from every dependency set and deactivates
//!    it permanently. A killed effect never executes again, even if it was
//!    already sitting in the job queue.
//!
//! # Re-entrancy
//!
//! An effect whose body would trigger itself (writing a key it also reads)
//! does not recurse: triggers skip effects that are currently running, and
//! `run()` itself is a no-op while the `running` flag is set.
//!
//! # Registration
//!
//! Effects stay registered with the engine until killed. Dropping an
//! [`Effect`] handle does not deactivate the underlying effect; its
//! subscriptions keep it reachable from the containers it reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::meta::DepSet;
use super::tracker::TrackerFrame;
use crate::scheduler::{queue_job, Job};

/// Unique identifier for an effect.
///
/// Dependency sets store effect IDs rather than handles, so membership
/// checks are O(1) and a set never keeps a killed effect alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Hook invoked in place of default scheduling when an effect is invalidated.
///
/// Computed values use this to flip their dirty flag instead of eagerly
/// recomputing.
pub type InvalidateHook = Box<dyn Fn(&Effect) + Send + Sync>;

/// Construction options for [`Effect::with_options`].
pub struct EffectOptions {
    /// Skip the eager initial run.
    pub lazy: bool,
    /// Custom invalidation hook overriding default scheduling.
    pub on_invalidate: Option<InvalidateHook>,
}

impl EffectOptions {
    /// Options for a lazy effect with default scheduling.
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            on_invalidate: None,
        }
    }
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            lazy: false,
            on_invalidate: None,
        }
    }
}

struct EffectInner {
    /// Unique identifier for this effect.
    id: EffectId,

    /// False once permanently killed.
    active: AtomicBool,

    /// True while the body is executing.
    running: AtomicBool,

    /// True while a job for this effect sits in the scheduler.
    /// Shared with the job so dedup is O(1).
    queued: Arc<AtomicBool>,

    /// Dependency sets this effect is currently a member of.
    /// Cleared and rebuilt on every run.
    edges: Mutex<SmallVec<[DepSet; 4]>>,

    /// The effect body.
    body: Box<dyn Fn() + Send + Sync>,

    /// Custom invalidation hook, if any.
    on_invalidate: Option<InvalidateHook>,

    /// Number of completed runs.
    run_count: AtomicUsize,
}

/// Resets the running flag when the body finishes, panicking or not.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl EffectInner {
    fn run(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        // Re-entrant run attempts are silently ignored.
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let _running = RunningGuard {
            flag: &self.running,
        };

        self.clear_edges();

        // Track dependencies for the duration of the body. The frame pops
        // even if the body panics.
        let _frame = TrackerFrame::enter(self.id);
        (self.body)();

        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_edges(&self) {
        let drained: SmallVec<[DepSet; 4]> = std::mem::take(&mut *self.edges.lock());
        for set in drained {
            set.remove(self.id);
        }
    }
}

// Global registry of live effects.
// Entries are strong: an effect exists until it is killed, not until its
// last handle is dropped.
static EFFECT_REGISTRY: OnceLock<RwLock<HashMap<EffectId, Arc<EffectInner>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<EffectId, Arc<EffectInner>>> {
    EFFECT_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve an effect ID to a handle, if the effect has not been killed.
pub(crate) fn lookup(id: EffectId) -> Option<Effect> {
    let inner = registry().read().get(&id).map(Arc::clone)?;
    Some(Effect { inner })
}

/// Invalidate the effect behind `id`, respecting lifecycle flags.
///
/// Killed effects are skipped. Running effects are skipped too: a trigger
/// raised from inside an effect's own body must not schedule that body again.
pub(crate) fn invalidate_by_id(id: EffectId) {
    let Some(effect) = lookup(id) else {
        return;
    };

    if effect.inner.running.load(Ordering::SeqCst) {
        tracing::trace!(effect = id.as_u64(), "skipping self-trigger of running effect");
        return;
    }

    effect.invalidate();
}

/// A re-runnable computation with tracked dependencies.
///
/// Cloning an `Effect` produces another handle to the same underlying effect.
///
/// # Example
///
/// ```rust,ignore
/// let list = observe(vec![1, 2, 3]);
///
/// let effect = Effect::new(move || {
///     println!("len is {}", list.len());
/// });
///
/// list.push(4);   // queues the effect
/// flush();        // prints: "len is 4"
/// effect.kill();  // never runs again
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it once to establish its dependencies.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(body, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(body: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: EffectId::new(),
            active: AtomicBool::new(true),
            running: AtomicBool::new(false),
            queued: Arc::new(AtomicBool::new(false)),
            edges: Mutex::new(SmallVec::new()),
            body: Box::new(body),
            on_invalidate: options.on_invalidate,
            run_count: AtomicUsize::new(0),
        });

        registry().write().insert(inner.id, Arc::clone(&inner));

        let effect = Self { inner };

        // Run immediately to establish dependencies
        if !options.lazy {
            effect.run();
        }

        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Execute the body now, rebuilding the dependency edges.
    ///
    /// No-op if the effect is killed or already running.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Permanently deactivate the effect.
    ///
    /// Unsubscribes from every dependency set and unregisters from the
    /// engine. Idempotent. The body will not execute again, even if a job
    /// for it is already queued.
    pub fn kill(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.clear_edges();
        registry().write().remove(&self.inner.id);

        tracing::trace!(effect = self.inner.id.as_u64(), "effect killed");
    }

    /// Whether the effect has not been killed.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether a job for this effect is currently queued.
    pub fn is_queued(&self) -> bool {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of dependency sets the effect is currently subscribed to.
    pub fn edge_count(&self) -> usize {
        self.inner.edges.lock().len()
    }

    /// Route an invalidation: custom hook if present, else queue a job.
    pub(crate) fn invalidate(&self) {
        match &self.inner.on_invalidate {
            Some(hook) => hook(self),
            None => queue_job(self.job()),
        }
    }

    /// Build the schedulable job for this effect.
    ///
    /// The job holds the effect weakly; once killed and dropped, a stale
    /// queue entry is a no-op.
    pub(crate) fn job(&self) -> Job {
        let weak: Weak<EffectInner> = Arc::downgrade(&self.inner);
        Job::with_flag(Arc::clone(&self.inner.queued), move || {
            if let Some(inner) = weak.upgrade() {
                inner.run();
            }
        })
    }

    /// Record membership in a dependency set.
    pub(crate) fn push_edge(&self, set: DepSet) {
        self.inner.edges.lock().push(set);
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("queued", &self.is_queued())
            .field("run_count", &self.run_count())
            .field("edge_count", &self.edge_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
