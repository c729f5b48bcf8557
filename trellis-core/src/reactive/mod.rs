//! Reactive Primitives
//!
//! This module implements the core reactive system: observable containers,
//! computed values, effects, and watches. These primitives form the
//! foundation of Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An observable wraps a plain container (a single value, a list, a map, or
//! a set) with per-key dependency metadata. When part of an observable is
//! read within a tracking context (such as a computed or effect), the read
//! automatically registers that context as a dependent of the touched key.
//! When that part changes, only the dependents of the touched key are
//! notified.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! the keys it read last time changes. Effects are used to synchronize
//! reactive state with external systems, such as patching a UI tree or
//! logging. Re-runs go through the scheduler queue, so a burst of changes
//! collapses into one run.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! lazily, on the next read after an invalidation, and notifies its own
//! readers only when it actually recomputes.
//!
//! ## Watches
//!
//! A watch observes a getter and calls back with the new and previous
//! values when the result changes. Deep watches walk nested observables so
//! a mutation anywhere below the root fires the callback.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies automatically. When an observable key is read, we check if
//! there is a running effect and, if so, register the dependency for that
//! key alone.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos; the
//! per-key granularity follows Vue's property-level proxies.

mod batch;
mod computed;
mod deep;
mod effect;
mod meta;
mod observe;
mod tracker;
mod watch;

pub use batch::{batch, is_batching, BatchGuard};
pub use computed::Computed;
pub use deep::{deep_track, DeepTrack, DeepVisit};
pub use effect::{Effect, EffectId, EffectOptions, InvalidateHook};
pub use meta::{DepSet, Key, MetaId, Metadata};
pub use observe::{
    observe, IntoObservable, ObservableCell, ObservableList, ObservableMap, ObservableSet,
};
pub use tracker::{
    is_tracking, running_effect, track_dependency, trigger_effects, trigger_keys, untracked,
};
pub use watch::{watch, OnCleanup, WatchHandle, WatchOptions};
