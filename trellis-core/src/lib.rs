//! Trellis Core
//!
//! This crate provides the core reactive engine for the Trellis UI
//! framework. It implements:
//!
//! - Reactive primitives (observable containers, computed values, effects,
//!   watches) with per-key dependency tracking
//! - A deduplicating job queue with batched, budget-aware flushing
//! - An async flush driver with debounced wakeups
//! - A keyed sequence reconciler producing minimal edit scripts
//!
//! The engine is host-agnostic: it never talks to a renderer directly.
//! Hosts react to effects and edit scripts and decide what "apply" means.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `scheduler`: Job queue, flush loop, and the async flush driver
//! - `reconcile`: Keyed diffing and edit-script application
//! - `errors`: Engine error type and the host error sink
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{observe, Effect};
//! use trellis_core::scheduler;
//!
//! // Wrap plain state in an observable container
//! let count = observe(0i64);
//!
//! // Create an effect; it runs once now and re-runs on change
//! let count_in_effect = count.clone();
//! let _printer = Effect::new(move || {
//!     println!("count = {}", count_in_effect.get());
//! });
//!
//! // Update the value and drain the queue
//! count.set(5);
//! scheduler::flush();
//! // Effect re-ran, printed: "count = 5"
//! ```

pub mod errors;
pub mod reactive;
pub mod reconcile;
pub mod scheduler;
