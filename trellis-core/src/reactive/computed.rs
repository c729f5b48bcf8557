//! Computed Values
//!
//! A Computed is a cached derived value that re-evaluates only when
//! something it read has changed, and only when somebody asks.
//!
//! # How Computeds Work
//!
//! 1. On first read, the computation runs inside a lazy effect and the
//!    result is cached. Whatever the computation read becomes the
//!    computed's dependency set.
//!
//! 2. Reads while clean return the cached value without recomputing.
//!
//! 3. When a dependency triggers, the computed does not recompute. It only
//!    flips its dirty flag and passes the invalidation on: subscribers (the
//!    effects that read this computed) are notified so they re-run and pull
//!    the fresh value; a computed nobody reads queues its own refresh job
//!    instead, so the cache is warm again after the next flush.
//!
//! 4. Reading a dirty computed recomputes on the spot, before tracking the
//!    reader as a subscriber.
//!
//! Repeat triggers while already dirty are swallowed. The dependents were
//! told once; telling them again before anyone recomputed adds nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::effect::{Effect, EffectId, EffectOptions};
use super::meta::DepSet;
use super::tracker::{notify_dep_set, track_dep_set, untracked};
use crate::scheduler::queue_job;

struct ComputedInner<T> {
    compute: Arc<dyn Fn() -> T + Send + Sync>,

    /// Lazy effect hosting the computation; its edges are the computed's
    /// dependencies.
    effect: Effect,

    /// Last computed value. None until the first evaluation.
    value: Arc<RwLock<Option<T>>>,

    /// True when a dependency changed since the last evaluation.
    dirty: Arc<AtomicBool>,

    /// Effects that read this computed.
    subscribers: DepSet,
}

/// A lazily re-evaluated derived value.
///
/// Cloning a `Computed` produces another handle to the same cache.
///
/// # Example
///
/// ```rust,ignore
/// let items = observe(vec![2, 3, 4]);
///
/// let total = {
///     let items = items.clone();
///     Computed::new(move || items.iter().sum::<i64>())
/// };
///
/// assert_eq!(total.get(), 9);  // computed now, cached after
/// items.push(5);               // marks the computed dirty, nothing runs
/// assert_eq!(total.get(), 14); // recomputed on read
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T: Send + Sync + 'static> Computed<T> {
    /// Create a computed value. The computation does not run until the
    /// first [`get`](Self::get).
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let compute: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(compute);
        let value: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));
        let dirty = Arc::new(AtomicBool::new(true));
        let subscribers = DepSet::new();

        let effect = Effect::with_options(
            {
                let compute = Arc::clone(&compute);
                let value = Arc::clone(&value);
                let dirty = Arc::clone(&dirty);
                move || {
                    let next = compute();
                    *value.write() = Some(next);
                    dirty.store(false, Ordering::SeqCst);
                }
            },
            EffectOptions {
                lazy: true,
                on_invalidate: Some(Box::new({
                    let dirty = Arc::clone(&dirty);
                    let subscribers = subscribers.clone();
                    move |effect: &Effect| {
                        if dirty.swap(true, Ordering::SeqCst) {
                            return;
                        }
                        if subscribers.is_empty() {
                            // Nobody will read us before the next flush;
                            // refresh ourselves then.
                            queue_job(effect.job());
                        } else {
                            notify_dep_set(&subscribers);
                        }
                    }
                })),
            },
        );

        Self {
            inner: Arc::new(ComputedInner {
                compute,
                effect,
                value,
                dirty,
                subscribers,
            }),
        }
    }

    /// Read the value, recomputing first if a dependency changed.
    ///
    /// When called inside a running effect, that effect subscribes to this
    /// computed and re-runs when it invalidates.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        if self.inner.dirty.load(Ordering::SeqCst) && self.inner.effect.is_active() {
            self.inner.effect.run();
        }

        track_dep_set(&self.inner.subscribers);

        if let Some(value) = self.inner.value.read().clone() {
            return value;
        }

        // Disposed before it ever evaluated: compute once, untracked.
        let value = untracked(|| (self.inner.compute)());
        *self.inner.value.write() = Some(value.clone());
        self.inner.dirty.store(false, Ordering::SeqCst);
        value
    }

    /// Read the cached value without tracking and without recomputing.
    /// None if the computed has never evaluated.
    pub fn get_untracked(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.value.read().clone()
    }

    /// Whether a dependency changed since the last evaluation.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Number of effects currently subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// ID of the backing effect.
    pub fn id(&self) -> EffectId {
        self.inner.effect.id()
    }

    /// Stop reacting to dependency changes.
    ///
    /// Reads keep returning the last cached value. Idempotent.
    pub fn dispose(&self) {
        self.inner.effect.kill();
    }

    /// Whether [`dispose`](Self::dispose) has not been called.
    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }
}

/// Clone shares the cache, dirty state, and backing effect.
impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug + Send + Sync + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.read())
            .field("dirty", &self.is_dirty())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::meta::{Key, Metadata};
    use crate::reactive::tracker::{track_dependency, trigger_effects};
    use crate::scheduler::{flush, pending_jobs, test_support};
    use std::sync::atomic::AtomicI32;

    /// A computed counting its evaluations, reading `key` on `meta`.
    fn counted_computed(
        meta: &Arc<Metadata>,
        key: &Key,
        compute_count: &Arc<AtomicI32>,
    ) -> Computed<i32> {
        let meta = Arc::clone(meta);
        let key = key.clone();
        let compute_count = Arc::clone(compute_count);
        Computed::new(move || {
            track_dependency(&meta, &key);
            compute_count.fetch_add(1, Ordering::SeqCst) + 1
        })
    }

    #[test]
    fn computed_is_lazy_and_caches() {
        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        // Nothing runs at construction
        assert_eq!(compute_count.load(Ordering::SeqCst), 0);
        assert!(computed.is_dirty());
        assert_eq!(computed.get_untracked(), None);

        assert_eq!(computed.get(), 1);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
        assert!(!computed.is_dirty());

        // Clean reads are free
        assert_eq!(computed.get(), 1);
        assert_eq!(computed.get(), 1);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        computed.dispose();
    }

    #[test]
    fn invalidation_defers_recompute_to_next_read() {
        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        assert_eq!(computed.get(), 1);

        trigger_effects(&meta, &key);
        assert!(computed.is_dirty());
        // Dirty, but nothing recomputed yet
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        assert_eq!(computed.get(), 2);
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);

        computed.dispose();
    }

    #[test]
    fn repeat_triggers_while_dirty_are_swallowed() {
        let _serial = test_support::serial();

        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        let _ = computed.get();

        trigger_effects(&meta, &key);
        let queued_after_first = pending_jobs();
        trigger_effects(&meta, &key);
        trigger_effects(&meta, &key);

        // Only the first trigger queued a refresh
        assert_eq!(pending_jobs(), queued_after_first);
        assert_eq!(queued_after_first, 1);

        flush();
        computed.dispose();
    }

    #[test]
    fn unobserved_computed_refreshes_itself_on_flush() {
        let _serial = test_support::serial();

        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        let _ = computed.get();
        assert_eq!(computed.subscriber_count(), 0);

        trigger_effects(&meta, &key);
        assert!(computed.is_dirty());

        flush();
        // The self-queued job recomputed without any reader
        assert!(!computed.is_dirty());
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);
        assert_eq!(computed.get_untracked(), Some(2));

        computed.dispose();
    }

    #[test]
    fn reader_effect_is_notified_through_the_computed() {
        let _serial = test_support::serial();

        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        let seen = Arc::new(AtomicI32::new(0));
        let reader = {
            let computed = computed.clone();
            let seen = Arc::clone(&seen);
            Effect::new(move || {
                seen.store(computed.get(), Ordering::SeqCst);
            })
        };

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(computed.subscriber_count(), 1);

        trigger_effects(&meta, &key);
        flush();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        // The reader pulled the fresh value during its re-run
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);

        reader.kill();
        computed.dispose();
    }

    #[test]
    fn diamond_readers_run_once_per_flush() {
        let _serial = test_support::serial();

        let meta = Metadata::new();
        let key = Key::field("source");
        let left_count = Arc::new(AtomicI32::new(0));
        let right_count = Arc::new(AtomicI32::new(0));
        let left = counted_computed(&meta, &key, &left_count);
        let right = counted_computed(&meta, &key, &right_count);

        let runs = Arc::new(AtomicI32::new(0));
        let reader = {
            let left = left.clone();
            let right = right.clone();
            let runs = Arc::clone(&runs);
            Effect::new(move || {
                let _ = left.get() + right.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // One source trigger invalidates both branches; the reader's queued
        // job dedups and it re-runs once
        trigger_effects(&meta, &key);
        flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        reader.kill();
        left.dispose();
        right.dispose();
    }

    #[test]
    fn dispose_freezes_the_cached_value() {
        let _serial = test_support::serial();

        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        assert_eq!(computed.get(), 1);
        computed.dispose();
        assert!(!computed.is_active());

        trigger_effects(&meta, &key);
        flush();

        // Still the old value, no recompute
        assert_eq!(computed.get(), 1);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        // Idempotent
        computed.dispose();
    }

    #[test]
    fn disposed_before_first_read_still_evaluates_once() {
        let meta = Metadata::new();
        let key = Key::field("source");
        let compute_count = Arc::new(AtomicI32::new(0));
        let computed = counted_computed(&meta, &key, &compute_count);

        computed.dispose();

        assert_eq!(computed.get(), 1);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);
        assert_eq!(computed.get(), 1);
        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        // The inline evaluation did not subscribe to anything
        assert!(meta
            .existing_dep_set(&key)
            .map(|set| set.is_empty())
            .unwrap_or(true));
    }
}
