//! Deep Traversal
//!
//! [`deep_track`] walks a value and forces dependency registration on every
//! nested observable it can reach, so a watcher with `deep: true` hears
//! about mutations buried inside the structure, not just replacement of the
//! top-level value.
//!
//! Traversal carries a [`DeepVisit`] set of container identities. A shared
//! container reached twice (or a cycle through shared handles) is walked
//! once per traversal.

use std::collections::HashSet;

use super::meta::MetaId;

/// Visited-set for one traversal, keyed by container identity.
#[derive(Debug, Default)]
pub struct DeepVisit {
    seen: HashSet<MetaId>,
}

impl DeepVisit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` visited. Returns false if it already was; the caller must
    /// then stop descending into that container.
    pub fn enter(&mut self, id: MetaId) -> bool {
        self.seen.insert(id)
    }
}

/// Values that can force registration of their nested dependencies.
///
/// Observable containers track their keys and recurse into elements; plain
/// data recurses structurally; scalars do nothing. Implement this for any
/// type you want to watch deeply.
pub trait DeepTrack {
    fn deep_track(&self, visit: &mut DeepVisit);
}

/// Walk `value` with a fresh visited set.
pub fn deep_track<T: DeepTrack + ?Sized>(value: &T) {
    let mut visit = DeepVisit::new();
    value.deep_track(&mut visit);
}

macro_rules! deep_track_leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeepTrack for $ty {
                fn deep_track(&self, _visit: &mut DeepVisit) {}
            }
        )*
    };
}

deep_track_leaf!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
);

impl DeepTrack for str {
    fn deep_track(&self, _visit: &mut DeepVisit) {}
}

impl<T: DeepTrack> DeepTrack for Option<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        if let Some(value) = self {
            value.deep_track(visit);
        }
    }
}

impl<T: DeepTrack> DeepTrack for Vec<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        for item in self {
            item.deep_track(visit);
        }
    }
}

impl<T: DeepTrack> DeepTrack for [T] {
    fn deep_track(&self, visit: &mut DeepVisit) {
        for item in self {
            item.deep_track(visit);
        }
    }
}

impl<T: DeepTrack + ?Sized> DeepTrack for &T {
    fn deep_track(&self, visit: &mut DeepVisit) {
        (**self).deep_track(visit);
    }
}

impl<T: DeepTrack + ?Sized> DeepTrack for Box<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        (**self).deep_track(visit);
    }
}

impl<T: DeepTrack + ?Sized> DeepTrack for std::sync::Arc<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        (**self).deep_track(visit);
    }
}

impl<A: DeepTrack, B: DeepTrack> DeepTrack for (A, B) {
    fn deep_track(&self, visit: &mut DeepVisit) {
        self.0.deep_track(visit);
        self.1.deep_track(visit);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
