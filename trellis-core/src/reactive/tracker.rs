//! Dependency Tracker
//!
//! The tracker knows which effect is currently running. This enables
//! automatic dependency tracking: when a container key is read, the running
//! effect is registered as a subscriber of that key.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. When an effect starts executing it
//! pushes a frame; when it finishes the frame pops. This design supports
//! nested execution (a computed read inside another effect) and the pop
//! happens in a guard's `Drop`, so the stack stays balanced even if the
//! effect body panics.
//!
//! A frame can also be a mask: [`untracked`] pushes an empty frame so reads
//! inside it register nothing, without disturbing the outer effect.
//!
//! # Triggering
//!
//! [`trigger_effects`] is the write-side counterpart. While a batch is open
//! the trigger is deferred and coalesced; otherwise every subscribed effect is
//! invalidated immediately. Effects that are currently running are skipped,
//! which is what keeps an effect that writes its own dependency from recursing
//! forever.

use std::cell::RefCell;
use std::sync::Arc;

use super::batch;
use super::effect::{self, EffectId};
use super::meta::{DepSet, Key, Metadata};

thread_local! {
    static TRACKER_STACK: RefCell<Vec<Option<EffectId>>> = RefCell::new(Vec::new());
}

/// Guard that pops the tracker frame when dropped.
///
/// This keeps the stack balanced even if the tracked computation panics.
pub(crate) struct TrackerFrame {
    entry: Option<EffectId>,
}

impl TrackerFrame {
    /// Push a frame for an executing effect.
    ///
    /// While this frame is on top, any key that is read subscribes the effect.
    /// The frame pops when the returned guard is dropped.
    pub(crate) fn enter(effect: EffectId) -> Self {
        TRACKER_STACK.with(|stack| {
            stack.borrow_mut().push(Some(effect));
        });

        Self {
            entry: Some(effect),
        }
    }

    /// Push a masking frame: reads underneath register no dependencies.
    pub(crate) fn masked() -> Self {
        TRACKER_STACK.with(|stack| {
            stack.borrow_mut().push(None);
        });

        Self { entry: None }
    }
}

impl Drop for TrackerFrame {
    fn drop(&mut self) {
        TRACKER_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the frame we pushed.
            // This helps catch bugs where frames are mismatched.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry, self.entry,
                    "tracker frame mismatch: expected {:?}, got {:?}",
                    self.entry, entry
                );
            }
        });
    }
}

/// The effect currently on top of the tracker stack, if any.
///
/// Returns `None` both when no effect is executing and when reads are masked
/// by [`untracked`].
pub fn running_effect() -> Option<EffectId> {
    TRACKER_STACK.with(|stack| stack.borrow().last().copied().flatten())
}

/// Whether reads at this point register dependencies.
pub fn is_tracking() -> bool {
    running_effect().is_some()
}

/// Run `f` with dependency tracking masked.
///
/// Reads inside `f` register nothing, regardless of which effect is running.
/// Container bulk operations use this internally so their element accesses do
/// not subscribe the caller to every slot they touch.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = TrackerFrame::masked();
    f()
}

/// Record that the running effect read `key` on the container behind `meta`.
///
/// No-op when no effect is running: plain reads outside a reactive context
/// stay cheap. Otherwise the key's dependency set gains the running effect
/// (at most once) and the set is appended to the effect's edge list so the
/// subscription is dropped on the effect's next run or kill.
pub fn track_dependency(meta: &Arc<Metadata>, key: &Key) {
    if running_effect().is_none() {
        return;
    }

    if key.is_index() {
        meta.note_integer_key();
    }

    track_dep_set(&meta.dep_set(key));
}

/// Subscribe the running effect to `set` directly.
///
/// Shared by key tracking and by [`Computed`](super::Computed), whose
/// subscriber set is a dependency set without a container key.
pub(crate) fn track_dep_set(set: &DepSet) {
    let Some(id) = running_effect() else {
        return;
    };

    // Only live effects subscribe; a stale frame registers nothing.
    let Some(handle) = effect::lookup(id) else {
        return;
    };

    if set.insert(id) {
        handle.push_edge(set.clone());
    }
}

/// Notify every effect subscribed to `key` on the container behind `meta`.
///
/// While a batch is open the trigger is deferred into the batch's pending set
/// and coalesced with other triggers on the same key. Otherwise subscribers
/// are invalidated now: scheduled through the job queue, or through their
/// custom invalidation hook when they have one.
pub fn trigger_effects(meta: &Arc<Metadata>, key: &Key) {
    if batch::defer(meta, key) {
        return;
    }

    trigger_now(meta, key);
}

/// Trigger `key` immediately, bypassing any open batch.
///
/// The batch drain calls this for each coalesced key once the outermost batch
/// exits.
pub(crate) fn trigger_now(meta: &Metadata, key: &Key) {
    let Some(set) = meta.existing_dep_set(key) else {
        return;
    };

    tracing::trace!(meta = meta.id().as_u64(), key = %key, subscribers = set.len(), "trigger");

    notify_dep_set(&set);
}

/// Invalidate every current member of `set`.
///
/// The member list is snapshotted first so notified effects can re-subscribe
/// or unsubscribe without holding the set's lock.
pub(crate) fn notify_dep_set(set: &DepSet) {
    for id in set.snapshot() {
        effect::invalidate_by_id(id);
    }
}

/// Trigger several keys on one container.
///
/// Structural mutations on ordered containers use this to notify the affected
/// positions together with [`Key::Iterate`].
pub fn trigger_keys(meta: &Arc<Metadata>, keys: impl IntoIterator<Item = Key>) {
    for key in keys {
        trigger_effects(meta, &key);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_running_effect() {
        let id = EffectId::new();

        assert!(!is_tracking());
        assert!(running_effect().is_none());

        {
            let _frame = TrackerFrame::enter(id);

            assert!(is_tracking());
            assert_eq!(running_effect(), Some(id));
        }

        // Frame should be cleaned up after drop
        assert!(!is_tracking());
        assert!(running_effect().is_none());
    }

    #[test]
    fn nested_frames_restore_outer() {
        let outer = EffectId::new();
        let inner = EffectId::new();

        {
            let _outer = TrackerFrame::enter(outer);
            assert_eq!(running_effect(), Some(outer));

            {
                let _inner = TrackerFrame::enter(inner);
                assert_eq!(running_effect(), Some(inner));
            }

            // After the inner frame drops, the outer is current again
            assert_eq!(running_effect(), Some(outer));
        }

        assert!(running_effect().is_none());
    }

    #[test]
    fn masked_frame_hides_running_effect() {
        let id = EffectId::new();
        let _frame = TrackerFrame::enter(id);

        assert_eq!(running_effect(), Some(id));

        let observed = untracked(running_effect);
        assert!(observed.is_none());

        // Mask is gone once untracked returns
        assert_eq!(running_effect(), Some(id));
    }

    #[test]
    fn untracked_passes_through_the_result() {
        assert_eq!(untracked(|| 21 * 2), 42);
    }

    #[test]
    fn track_outside_effect_is_a_no_op() {
        let meta = Metadata::new();
        let key = Key::field("quiet");

        track_dependency(&meta, &key);

        // No dependency set should have been materialized
        assert!(meta.existing_dep_set(&key).is_none());
    }

    #[test]
    fn trigger_without_subscribers_allocates_nothing() {
        let meta = Metadata::new();
        let key = Key::field("silent");

        trigger_effects(&meta, &key);

        assert!(meta.existing_dep_set(&key).is_none());
        assert_eq!(meta.tracked_key_count(), 0);
    }
}
