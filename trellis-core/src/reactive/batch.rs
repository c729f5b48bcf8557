//! Trigger Batching
//!
//! Lets a burst of mutations notify subscribers once instead of once per
//! write.
//!
//! # How Batching Works
//!
//! 1. [`batch`] (or a manually held [`BatchGuard`]) increments a
//!    thread-local depth counter. Batches nest; only the outermost one has
//!    an effect on replay timing.
//!
//! 2. While the depth is non-zero, triggers do not notify anyone. Each
//!    `(container, key)` pair is recorded in a pending map, deduplicated, in
//!    first-trigger order.
//!
//! 3. When the outermost batch exits, the pending pairs replay as real
//!    triggers. Five writes to the same key notify its subscribers once.
//!
//! Each replayed trigger is isolated: if one panics (a custom invalidation
//! hook, say), the panic is reported to the error sink and the remaining
//! triggers still run.

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::meta::{Key, Metadata, MetaId};
use super::tracker::trigger_now;
use crate::errors::{self, EngineError};

struct PendingEntry {
    meta: Arc<Metadata>,
    keys: IndexSet<Key>,
}

thread_local! {
    static DEPTH: Cell<usize> = Cell::new(0);
    static PENDING: RefCell<IndexMap<MetaId, PendingEntry>> =
        RefCell::new(IndexMap::new());
}

/// Run `f` with triggers deferred and coalesced until it returns.
///
/// ```rust,ignore
/// batch(|| {
///     list.push(1);
///     list.push(2);
///     cell.set(9);
/// });
/// // subscribers were notified once per touched key, here, not per write
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _guard = BatchGuard::enter();
    f()
}

/// Whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

/// RAII alternative to [`batch`] for scopes that do not fit a closure.
/// Dropping the guard closes the batch; the outermost drop replays.
#[must_use = "the batch ends when the guard drops"]
pub struct BatchGuard {
    _private: (),
}

impl BatchGuard {
    /// Open a batch on this thread.
    pub fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _private: () }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let remaining = DEPTH.with(|depth| {
            let value = depth.get() - 1;
            depth.set(value);
            value
        });
        if remaining == 0 {
            replay();
        }
    }
}

/// Record a trigger for replay if a batch is open. Returns false when no
/// batch is open and the caller should trigger immediately.
pub(crate) fn defer(meta: &Arc<Metadata>, key: &Key) -> bool {
    if !is_batching() {
        return false;
    }

    PENDING.with(|pending| {
        pending
            .borrow_mut()
            .entry(meta.id())
            .or_insert_with(|| PendingEntry {
                meta: Arc::clone(meta),
                keys: IndexSet::new(),
            })
            .keys
            .insert(key.clone());
    });

    true
}

/// Replay the coalesced triggers recorded by the batch that just closed.
///
/// The pending map is taken before replaying, so triggers raised *during*
/// replay go through the normal immediate path instead of feeding a batch
/// that no longer exists.
fn replay() {
    let pending = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    if pending.is_empty() {
        return;
    }

    tracing::trace!(containers = pending.len(), "replaying batched triggers");

    for (_, entry) in pending {
        for key in &entry.keys {
            let result = catch_unwind(AssertUnwindSafe(|| trigger_now(&entry.meta, key)));
            if let Err(payload) = result {
                errors::report(EngineError::TriggerPanicked {
                    key: key.to_string(),
                    message: errors::panic_message(payload.as_ref()),
                });
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
