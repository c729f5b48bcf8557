//! Container Metadata
//!
//! Every observed container gets one [`Metadata`] record: a side-table entry
//! holding the container's dependency map and bookkeeping flags. The observed
//! data itself is never marked; all reactive state lives here.
//!
//! # The Dependency Map
//!
//! The map goes from field [`Key`] to the [`DepSet`] of effects subscribed to
//! that key. A reserved pseudo-key, [`Key::Iterate`], stands for
//! whole-structure enumeration: anything that depends on the container's
//! length, its key set, or a full walk subscribes there, and every structural
//! mutation notifies it.
//!
//! # Identity
//!
//! Metadata is identity-keyed. A global registry maps [`MetaId`] to a weak
//! reference, so collaborators can resolve an id without extending the
//! container's lifetime. When the last handle to a container drops, its
//! Metadata drops with it and the registry entry goes stale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::effect::EffectId;

/// Unique identifier for a container's metadata.
///
/// Used as the identity key in the metadata registry and in the batch
/// coalescing map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaId(u64);

impl MetaId {
    /// Generate a new unique metadata ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging and identity sets.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for MetaId {
    fn default() -> Self {
        Self::new()
    }
}

/// A field key within an observed container.
///
/// Reads and writes are tracked at key granularity: a record field by name, a
/// list slot by position, or the whole structure via [`Key::Iterate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Key {
    /// A named field on a record or map entry.
    Field(String),
    /// A positional slot in an ordered container.
    Index(usize),
    /// The reserved pseudo-key for whole-structure enumeration.
    Iterate,
}

impl Key {
    /// Build a field key from anything string-like.
    pub fn field(name: impl Into<String>) -> Self {
        Key::Field(name.into())
    }

    /// Build a positional key.
    pub fn index(position: usize) -> Self {
        Key::Index(position)
    }

    /// Whether this is a positional key.
    pub fn is_index(&self) -> bool {
        matches!(self, Key::Index(_))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{name}"),
            Key::Index(position) => write!(f, "[{position}]"),
            Key::Iterate => write!(f, "<iterate>"),
        }
    }
}

/// The set of effects subscribed to one key.
///
/// Shared between the metadata's dependency map and the edge lists of the
/// subscribed effects, so an effect can unsubscribe itself without going back
/// through the container.
pub struct DepSet {
    effects: Arc<RwLock<IndexSet<EffectId>>>,
}

impl DepSet {
    /// Create an empty dependency set.
    pub fn new() -> Self {
        Self {
            effects: Arc::new(RwLock::new(IndexSet::new())),
        }
    }

    /// Add an effect to the set.
    ///
    /// Returns true if the effect was not already a member. Membership is
    /// semantic: an effect subscribes to a key at most once.
    pub fn insert(&self, id: EffectId) -> bool {
        self.effects.write().insert(id)
    }

    /// Remove an effect from the set. Returns true if it was a member.
    pub fn remove(&self, id: EffectId) -> bool {
        self.effects.write().swap_remove(&id)
    }

    /// Whether the effect is currently a member.
    pub fn contains(&self, id: EffectId) -> bool {
        self.effects.read().contains(&id)
    }

    /// Number of subscribed effects.
    pub fn len(&self) -> usize {
        self.effects.read().len()
    }

    /// Whether the set has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.effects.read().is_empty()
    }

    /// Copy the current members out.
    ///
    /// Trigger paths snapshot first and notify after releasing the lock, so a
    /// notified effect can re-subscribe without deadlocking.
    pub fn snapshot(&self) -> SmallVec<[EffectId; 4]> {
        self.effects.read().iter().copied().collect()
    }
}

impl Clone for DepSet {
    fn clone(&self) -> Self {
        Self {
            effects: Arc::clone(&self.effects),
        }
    }
}

impl Default for DepSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DepSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepSet")
            .field("len", &self.len())
            .finish()
    }
}

/// Per-container reactive metadata.
pub struct Metadata {
    /// Unique identity of the observed container.
    id: MetaId,

    /// Dependency map: key to the set of subscribed effects.
    deps: RwLock<IndexMap<Key, DepSet>>,

    /// Set once an integer-like key has been observed on this container.
    ///
    /// Reordering operations consult this to decide whether positional
    /// subscriptions must all be invalidated.
    has_integer_keys: AtomicBool,
}

// Global registry of live metadata, keyed by identity.
// Weak references so the registry never extends a container's lifetime.
static METADATA_REGISTRY: OnceLock<RwLock<HashMap<MetaId, Weak<Metadata>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<MetaId, Weak<Metadata>>> {
    METADATA_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

impl Metadata {
    /// Create metadata for a newly observed container and register it.
    pub fn new() -> Arc<Self> {
        let meta = Arc::new(Self {
            id: MetaId::new(),
            deps: RwLock::new(IndexMap::new()),
            has_integer_keys: AtomicBool::new(false),
        });

        registry().write().insert(meta.id, Arc::downgrade(&meta));

        meta
    }

    /// The container's identity.
    pub fn id(&self) -> MetaId {
        self.id
    }

    /// Resolve a metadata id to a live handle, if the container still exists.
    pub fn lookup(id: MetaId) -> Option<Arc<Metadata>> {
        registry().read().get(&id).and_then(Weak::upgrade)
    }

    /// Get the dependency set for a key, creating it on first subscription.
    pub fn dep_set(&self, key: &Key) -> DepSet {
        if let Some(set) = self.deps.read().get(key) {
            return set.clone();
        }
        self.deps
            .write()
            .entry(key.clone())
            .or_insert_with(DepSet::new)
            .clone()
    }

    /// Get the dependency set for a key only if one already exists.
    ///
    /// Trigger paths use this so that notifying an unobserved key allocates
    /// nothing.
    pub fn existing_dep_set(&self, key: &Key) -> Option<DepSet> {
        self.deps.read().get(key).cloned()
    }

    /// Record that an integer-like key has been observed.
    pub(crate) fn note_integer_key(&self) {
        self.has_integer_keys.store(true, Ordering::Relaxed);
    }

    /// Whether an integer-like key has ever been observed on this container.
    pub fn has_integer_keys(&self) -> bool {
        self.has_integer_keys.load(Ordering::Relaxed)
    }

    /// Collect the keys that currently have a dependency set and satisfy the
    /// predicate.
    ///
    /// Structural mutations use this to notify only positions somebody is
    /// actually subscribed to, instead of fabricating a trigger per slot.
    pub fn tracked_keys<F>(&self, pred: F) -> SmallVec<[Key; 8]>
    where
        F: Fn(&Key) -> bool,
    {
        self.deps
            .read()
            .iter()
            .filter(|(key, set)| pred(key) && !set.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of keys with a dependency set.
    pub fn tracked_key_count(&self) -> usize {
        self.deps.read().len()
    }
}

impl Drop for Metadata {
    fn drop(&mut self) {
        registry().write().remove(&self.id);
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("id", &self.id)
            .field("tracked_keys", &self.tracked_key_count())
            .field("has_integer_keys", &self.has_integer_keys())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_ids_are_unique() {
        let id1 = MetaId::new();
        let id2 = MetaId::new();
        let id3 = MetaId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dep_set_membership_is_semantic() {
        let set = DepSet::new();
        let id = EffectId::new();

        // First insert is new, second is a no-op
        assert!(set.insert(id));
        assert!(!set.insert(id));
        assert_eq!(set.len(), 1);

        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert!(set.is_empty());
    }

    #[test]
    fn dep_set_clone_shares_members() {
        let set1 = DepSet::new();
        let set2 = set1.clone();
        let id = EffectId::new();

        set1.insert(id);
        assert!(set2.contains(id));

        set2.remove(id);
        assert!(set1.is_empty());
    }

    #[test]
    fn metadata_creates_dep_sets_lazily() {
        let meta = Metadata::new();
        let key = Key::field("title");

        // No set until a subscription asks for one
        assert!(meta.existing_dep_set(&key).is_none());

        let set = meta.dep_set(&key);
        set.insert(EffectId::new());

        // The same set comes back on the next lookup
        let again = meta.existing_dep_set(&key).unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn metadata_registry_resolves_live_containers() {
        let meta = Metadata::new();
        let id = meta.id();

        let found = Metadata::lookup(id).unwrap();
        assert_eq!(found.id(), id);

        drop(found);
        drop(meta);

        // Once every handle is gone the registry entry is stale
        assert!(Metadata::lookup(id).is_none());
    }

    #[test]
    fn tracked_keys_filters_by_predicate() {
        let meta = Metadata::new();
        let effect = EffectId::new();

        meta.dep_set(&Key::index(0)).insert(effect);
        meta.dep_set(&Key::index(3)).insert(effect);
        meta.dep_set(&Key::Iterate).insert(effect);
        // Empty sets are skipped even if the key exists
        meta.dep_set(&Key::index(9));

        let positional = meta.tracked_keys(|key| matches!(key, Key::Index(i) if *i >= 1));
        assert_eq!(positional.as_slice(), &[Key::index(3)]);
    }

    #[test]
    fn integer_key_flag_latches() {
        let meta = Metadata::new();
        assert!(!meta.has_integer_keys());

        meta.note_integer_key();
        assert!(meta.has_integer_keys());

        // The flag never resets
        meta.note_integer_key();
        assert!(meta.has_integer_keys());
    }

    #[test]
    fn key_display_is_compact() {
        assert_eq!(Key::field("name").to_string(), "name");
        assert_eq!(Key::index(4).to_string(), "[4]");
        assert_eq!(Key::Iterate.to_string(), "<iterate>");
    }
}
