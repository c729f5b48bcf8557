//! Observable Containers
//!
//! Wrappers that make plain data observable. Reads register the running
//! effect against a key in the container's metadata; writes trigger the
//! effects subscribed to the touched keys.
//!
//! Four granularities:
//!
//! - [`ObservableCell<T>`] — one tracked value. A record becomes one cell
//!   per field.
//! - [`ObservableList<T>`] — positional reads track per-index keys, whole
//!   reads track the iterate key, structural edits trigger the shifted index
//!   range plus iterate.
//! - [`ObservableMap<V>`] — string-keyed; reads track the field key (misses
//!   included, so a later insert notifies), key-set changes also trigger
//!   iterate.
//! - [`ObservableSet<T>`] — membership only, tracked at iterate granularity.
//!
//! Cloning a wrapper clones a handle; both point at the same data and the
//! same metadata. Equality between handles is identity, not contents.
//!
//! Write methods release the data lock before triggering, so invalidation
//! hooks may read the container they were notified about.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::deep::{DeepTrack, DeepVisit};
use super::meta::{Key, Metadata};
use super::tracker::{track_dependency, trigger_effects, trigger_keys, untracked};

// ----------------------------------------------------------------------------
// ObservableCell
// ----------------------------------------------------------------------------

/// A single observable value.
///
/// # Example
///
/// ```rust,ignore
/// let name = ObservableCell::new(String::from("ada"));
///
/// let effect = Effect::new({
///     let name = name.clone();
///     move || println!("hello {}", name.get())
/// });
///
/// name.set(String::from("grace")); // queues the effect
/// ```
pub struct ObservableCell<T> {
    meta: Arc<Metadata>,
    key: Key,
    value: Arc<RwLock<T>>,
}

impl<T> ObservableCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            meta: Metadata::new(),
            key: Key::field("value"),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Tracked read.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        track_dependency(&self.meta, &self.key);
        self.value.read().clone()
    }

    /// Tracked borrow without cloning. The closure must not write back into
    /// this cell; the read lock is held while it runs.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track_dependency(&self.meta, &self.key);
        f(&self.value.read())
    }

    /// Read without registering a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.value.read().clone()
    }

    /// Replace the value and trigger subscribers.
    pub fn set(&self, value: T) {
        {
            *self.value.write() = value;
        }
        trigger_effects(&self.meta, &self.key);
    }

    /// Mutate in place and trigger subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            f(&mut self.value.write());
        }
        trigger_effects(&self.meta, &self.key);
    }

    /// The container's metadata, for low-level integrations.
    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }
}

/// Clone shares the value and its subscribers.
impl<T> Clone for ObservableCell<T> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            key: self.key.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

/// Identity: two handles are equal when they share the same cell.
impl<T> PartialEq for ObservableCell<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Eq for ObservableCell<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableCell")
            .field("id", &self.meta.id())
            .field("value", &*self.value.read())
            .finish()
    }
}

impl<T: DeepTrack> DeepTrack for ObservableCell<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        if !visit.enter(self.meta.id()) {
            return;
        }
        track_dependency(&self.meta, &self.key);
        self.value.read().deep_track(visit);
    }
}

// ----------------------------------------------------------------------------
// ObservableList
// ----------------------------------------------------------------------------

/// An observable `Vec`.
///
/// Positional reads subscribe to that index only; `len`/`snapshot`/`with`
/// subscribe to the whole structure. Structural edits notify the index range
/// they shifted plus the iterate key; reorders invalidate every positional
/// subscription, but only once positional reads have actually happened
/// (`has_integer_keys`).
pub struct ObservableList<T> {
    meta: Arc<Metadata>,
    data: Arc<RwLock<Vec<T>>>,
}

impl<T> ObservableList<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            meta: Metadata::new(),
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Tracked positional read.
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        track_dependency(&self.meta, &Key::index(index));
        self.data.read().get(index).cloned()
    }

    /// Positional read without registering a dependency.
    pub fn get_untracked(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.data.read().get(index).cloned()
    }

    /// Tracked length.
    pub fn len(&self) -> usize {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().is_empty()
    }

    /// Tracked full copy. Subscribes to the structure and to every current
    /// index, so element writes reach snapshot observers too.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        let data = self.data.read();
        self.track_all(data.len());
        data.clone()
    }

    /// Tracked borrow of the whole slice. Same subscriptions as
    /// [`snapshot`](Self::snapshot); the read lock is held while the closure
    /// runs, so it must not write back into this list.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let data = self.data.read();
        self.track_all(data.len());
        f(&data)
    }

    fn track_all(&self, len: usize) {
        track_dependency(&self.meta, &Key::Iterate);
        for index in 0..len {
            track_dependency(&self.meta, &Key::index(index));
        }
    }

    /// Replace the element at `index`. Triggers that index only. Returns
    /// false if out of bounds.
    pub fn set(&self, index: usize, value: T) -> bool {
        {
            let mut data = self.data.write();
            match data.get_mut(index) {
                Some(slot) => *slot = value,
                None => return false,
            }
        }
        trigger_effects(&self.meta, &Key::index(index));
        true
    }

    /// Append. Triggers the appended index and iterate.
    pub fn push(&self, value: T) {
        let appended = {
            let mut data = self.data.write();
            data.push(value);
            data.len() - 1
        };
        trigger_keys(&self.meta, [Key::index(appended), Key::Iterate]);
    }

    /// Remove the last element. Triggers its former index and iterate.
    pub fn pop(&self) -> Option<T> {
        let (value, new_len) = {
            let mut data = self.data.write();
            let value = data.pop()?;
            (value, data.len())
        };
        trigger_keys(&self.meta, self.shifted_keys(new_len));
        Some(value)
    }

    /// Insert at `index`, shifting the tail right. Triggers every tracked
    /// index at or above `index`, plus iterate. Returns false if `index`
    /// is past the end.
    pub fn insert(&self, index: usize, value: T) -> bool {
        {
            let mut data = self.data.write();
            if index > data.len() {
                return false;
            }
            data.insert(index, value);
        }
        trigger_keys(&self.meta, self.shifted_keys(index));
        true
    }

    /// Remove at `index`, shifting the tail left. Triggers every tracked
    /// index at or above `index`, plus iterate.
    pub fn remove(&self, index: usize) -> Option<T> {
        let value = {
            let mut data = self.data.write();
            if index >= data.len() {
                return None;
            }
            data.remove(index)
        };
        trigger_keys(&self.meta, self.shifted_keys(index));
        Some(value)
    }

    /// Swap two positions. Triggers both indexes and iterate.
    pub fn swap(&self, a: usize, b: usize) -> bool {
        {
            let mut data = self.data.write();
            if a >= data.len() || b >= data.len() {
                return false;
            }
            data.swap(a, b);
        }
        if a != b {
            trigger_keys(&self.meta, [Key::index(a), Key::index(b), Key::Iterate]);
        }
        true
    }

    /// Append many. The source iterator runs untracked; one trigger covers
    /// the appended range and iterate.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = untracked(|| items.into_iter().collect());
        if items.is_empty() {
            return;
        }
        let old_len = {
            let mut data = self.data.write();
            let old_len = data.len();
            data.extend(items);
            old_len
        };
        trigger_keys(&self.meta, self.shifted_keys(old_len));
    }

    /// Keep only elements the predicate accepts. The predicate runs
    /// untracked; one trigger covers all positions if anything was dropped.
    pub fn retain(&self, mut pred: impl FnMut(&T) -> bool) {
        let changed = {
            let mut data = self.data.write();
            let before = data.len();
            untracked(|| data.retain(|item| pred(item)));
            data.len() != before
        };
        if changed {
            trigger_keys(&self.meta, self.positional_keys());
        }
    }

    /// Drop every element. Triggers all tracked positions and iterate.
    pub fn clear(&self) {
        {
            let mut data = self.data.write();
            if data.is_empty() {
                return;
            }
            data.clear();
        }
        trigger_keys(&self.meta, self.positional_keys());
    }

    /// Sort with a comparator. The comparator runs untracked. Positional
    /// subscriptions are invalidated only when positional reads exist.
    pub fn sort_by(&self, mut compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        {
            let mut data = self.data.write();
            if data.len() < 2 {
                return;
            }
            untracked(|| data.sort_by(|a, b| compare(a, b)));
        }
        trigger_keys(&self.meta, self.reorder_keys());
    }

    /// Reverse in place. Same invalidation rule as [`sort_by`](Self::sort_by).
    pub fn reverse(&self) {
        {
            let mut data = self.data.write();
            if data.len() < 2 {
                return;
            }
            data.reverse();
        }
        trigger_keys(&self.meta, self.reorder_keys());
    }

    /// The container's metadata, for low-level integrations.
    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }

    /// Tracked index keys at or above `from`, plus iterate.
    fn shifted_keys(&self, from: usize) -> SmallVec<[Key; 8]> {
        let mut keys = self
            .meta
            .tracked_keys(|key| matches!(key, Key::Index(i) if *i >= from));
        keys.push(Key::Iterate);
        keys
    }

    /// Every tracked index key, plus iterate.
    fn positional_keys(&self) -> SmallVec<[Key; 8]> {
        let mut keys = self.meta.tracked_keys(Key::is_index);
        keys.push(Key::Iterate);
        keys
    }

    /// Reorders leave membership intact: positional subscriptions only
    /// matter if positional reads happened, which latches
    /// `has_integer_keys`.
    fn reorder_keys(&self) -> SmallVec<[Key; 8]> {
        if self.meta.has_integer_keys() {
            self.positional_keys()
        } else {
            let mut keys = SmallVec::new();
            keys.push(Key::Iterate);
            keys
        }
    }
}

/// Clone shares the data and its subscribers.
impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            data: Arc::clone(&self.data),
        }
    }
}

/// Identity: two handles are equal when they share the same list.
impl<T> PartialEq for ObservableList<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T> Eq for ObservableList<T> {}

impl<T> std::fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableList")
            .field("id", &self.meta.id())
            .field("len", &self.data.read().len())
            .finish()
    }
}

impl<T: DeepTrack> DeepTrack for ObservableList<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        if !visit.enter(self.meta.id()) {
            return;
        }
        track_dependency(&self.meta, &Key::Iterate);
        let data = self.data.read();
        for (index, item) in data.iter().enumerate() {
            track_dependency(&self.meta, &Key::index(index));
            item.deep_track(visit);
        }
    }
}

// ----------------------------------------------------------------------------
// ObservableMap
// ----------------------------------------------------------------------------

/// An observable string-keyed map.
///
/// Reads subscribe to the field key whether or not it is present, so an
/// observer of a missing key hears about its arrival. Inserting a new key
/// and removing one also trigger iterate; overwriting an existing key
/// triggers its field only.
pub struct ObservableMap<V> {
    meta: Arc<Metadata>,
    data: Arc<RwLock<IndexMap<String, V>>>,
}

impl<V> ObservableMap<V> {
    pub fn new(data: IndexMap<String, V>) -> Self {
        Self {
            meta: Metadata::new(),
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Tracked read. Misses are tracked too.
    pub fn get(&self, name: &str) -> Option<V>
    where
        V: Clone,
    {
        track_dependency(&self.meta, &Key::field(name));
        self.data.read().get(name).cloned()
    }

    /// Read without registering a dependency.
    pub fn get_untracked(&self, name: &str) -> Option<V>
    where
        V: Clone,
    {
        self.data.read().get(name).cloned()
    }

    /// Tracked membership probe. Membership changes only with the key set,
    /// so this subscribes to iterate.
    pub fn contains_key(&self, name: &str) -> bool {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().is_empty()
    }

    /// Tracked key listing.
    pub fn keys(&self) -> Vec<String> {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().keys().cloned().collect()
    }

    /// Tracked full copy. Subscribes to iterate and to every present field,
    /// so value overwrites reach snapshot observers too.
    pub fn snapshot(&self) -> IndexMap<String, V>
    where
        V: Clone,
    {
        track_dependency(&self.meta, &Key::Iterate);
        let data = self.data.read();
        for name in data.keys() {
            track_dependency(&self.meta, &Key::Field(name.clone()));
        }
        data.clone()
    }

    /// Insert or overwrite. A fresh key triggers its field and iterate; an
    /// overwrite triggers the field only. Returns the previous value.
    pub fn insert(&self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        let previous = { self.data.write().insert(name.clone(), value) };
        if previous.is_some() {
            trigger_effects(&self.meta, &Key::Field(name));
        } else {
            trigger_keys(&self.meta, [Key::Field(name), Key::Iterate]);
        }
        previous
    }

    /// Remove a key. Triggers its field and iterate if it was present.
    /// Preserves the order of the remaining entries.
    pub fn remove(&self, name: &str) -> Option<V> {
        let removed = { self.data.write().shift_remove(name) };
        if removed.is_some() {
            trigger_keys(&self.meta, [Key::field(name), Key::Iterate]);
        }
        removed
    }

    /// Drop every entry. One trigger covers the tracked fields that were
    /// present, plus iterate.
    pub fn clear(&self) {
        let removed: IndexSet<String> = {
            let mut data = self.data.write();
            if data.is_empty() {
                return;
            }
            let names = data.keys().cloned().collect();
            data.clear();
            names
        };
        let mut keys = self
            .meta
            .tracked_keys(|key| matches!(key, Key::Field(name) if removed.contains(name)));
        keys.push(Key::Iterate);
        trigger_keys(&self.meta, keys);
    }

    /// The container's metadata, for low-level integrations.
    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }
}

/// Clone shares the data and its subscribers.
impl<V> Clone for ObservableMap<V> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            data: Arc::clone(&self.data),
        }
    }
}

/// Identity: two handles are equal when they share the same map.
impl<V> PartialEq for ObservableMap<V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<V> Eq for ObservableMap<V> {}

impl<V> std::fmt::Debug for ObservableMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableMap")
            .field("id", &self.meta.id())
            .field("len", &self.data.read().len())
            .finish()
    }
}

impl<V: DeepTrack> DeepTrack for ObservableMap<V> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        if !visit.enter(self.meta.id()) {
            return;
        }
        track_dependency(&self.meta, &Key::Iterate);
        let data = self.data.read();
        for (name, value) in data.iter() {
            track_dependency(&self.meta, &Key::Field(name.clone()));
            value.deep_track(visit);
        }
    }
}

// ----------------------------------------------------------------------------
// ObservableSet
// ----------------------------------------------------------------------------

/// An observable membership set, tracked at iterate granularity: any
/// membership change notifies every observer of the set.
pub struct ObservableSet<T> {
    meta: Arc<Metadata>,
    data: Arc<RwLock<IndexSet<T>>>,
}

impl<T: std::hash::Hash + Eq> ObservableSet<T> {
    pub fn new(data: IndexSet<T>) -> Self {
        Self {
            meta: Metadata::new(),
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Tracked membership probe.
    pub fn contains(&self, value: &T) -> bool {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().contains(value)
    }

    pub fn len(&self) -> usize {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().is_empty()
    }

    /// Tracked copy of the members, in insertion order.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        track_dependency(&self.meta, &Key::Iterate);
        self.data.read().iter().cloned().collect()
    }

    /// Add a member. Triggers only if it was absent. Returns true if added.
    pub fn insert(&self, value: T) -> bool {
        let added = { self.data.write().insert(value) };
        if added {
            trigger_effects(&self.meta, &Key::Iterate);
        }
        added
    }

    /// Remove a member. Triggers only if it was present. Preserves the
    /// order of the remaining members.
    pub fn remove(&self, value: &T) -> bool {
        let removed = { self.data.write().shift_remove(value) };
        if removed {
            trigger_effects(&self.meta, &Key::Iterate);
        }
        removed
    }

    /// Add many. One trigger if anything was new.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = untracked(|| items.into_iter().collect());
        let added = {
            let mut data = self.data.write();
            let before = data.len();
            data.extend(items);
            data.len() != before
        };
        if added {
            trigger_effects(&self.meta, &Key::Iterate);
        }
    }

    /// Drop every member. One trigger if the set was non-empty.
    pub fn clear(&self) {
        let changed = {
            let mut data = self.data.write();
            let was_empty = data.is_empty();
            data.clear();
            !was_empty
        };
        if changed {
            trigger_effects(&self.meta, &Key::Iterate);
        }
    }

    /// The container's metadata, for low-level integrations.
    pub fn meta(&self) -> &Arc<Metadata> {
        &self.meta
    }
}

/// Clone shares the data and its subscribers.
impl<T> Clone for ObservableSet<T> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            data: Arc::clone(&self.data),
        }
    }
}

/// Identity: two handles are equal when they share the same set.
impl<T> PartialEq for ObservableSet<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T> Eq for ObservableSet<T> {}

impl<T> std::fmt::Debug for ObservableSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableSet")
            .field("id", &self.meta.id())
            .field("len", &self.data.read().len())
            .finish()
    }
}

impl<T: DeepTrack> DeepTrack for ObservableSet<T> {
    fn deep_track(&self, visit: &mut DeepVisit) {
        if !visit.enter(self.meta.id()) {
            return;
        }
        track_dependency(&self.meta, &Key::Iterate);
        for item in self.data.read().iter() {
            item.deep_track(visit);
        }
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

/// Containers and values convertible into their observable wrapper via
/// [`observe`].
pub trait IntoObservable {
    type Observable;
    fn into_observable(self) -> Self::Observable;
}

impl<T> IntoObservable for Vec<T> {
    type Observable = ObservableList<T>;
    fn into_observable(self) -> ObservableList<T> {
        ObservableList::new(self)
    }
}

impl<V> IntoObservable for IndexMap<String, V> {
    type Observable = ObservableMap<V>;
    fn into_observable(self) -> ObservableMap<V> {
        ObservableMap::new(self)
    }
}

impl<T: std::hash::Hash + Eq> IntoObservable for IndexSet<T> {
    type Observable = ObservableSet<T>;
    fn into_observable(self) -> ObservableSet<T> {
        ObservableSet::new(self)
    }
}

macro_rules! into_observable_cell {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoObservable for $ty {
                type Observable = ObservableCell<$ty>;
                fn into_observable(self) -> ObservableCell<$ty> {
                    ObservableCell::new(self)
                }
            }
        )*
    };
}

into_observable_cell!(bool, char, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String);

/// Wrap a plain container or value in its observable form.
pub fn observe<C: IntoObservable>(container: C) -> C::Observable {
    container.into_observable()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
