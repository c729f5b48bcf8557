//! Keyed Sequence Reconciliation
//!
//! [`reconcile`] compares two ordered key sequences and produces the
//! minimal-move [`EditScript`] turning the first into the second: items
//! whose old indices form a longest increasing subsequence stay where they
//! are, everything else moves, arrives, or leaves.
//!
//! The reconciler is a pure function of its two inputs. Keys are opaque;
//! the script speaks in indices only, so hosts can bridge it across
//! process boundaries (`serde`) or drive a renderer directly through
//! [`EditScript::apply`].
//!
//! ```rust,ignore
//! let script = reconcile(&["a", "b", "c"], &["c", "a", "b"]);
//! assert_eq!(script.moved(), 1); // moving "c" to the front is enough
//! ```

mod lis;

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// One slot of the edit script, aligned to a position in `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEntry {
    /// Already in correct relative order; stays put.
    Keep { old: usize },
    /// Present before, but must be repositioned.
    Move { old: usize },
    /// Not present before.
    Insert,
}

/// Minimal keep/move/insert/remove operations between two keyed orderings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScript {
    entries: Vec<ScriptEntry>,
    removed: Vec<usize>,
}

impl EditScript {
    /// Per-position operations, aligned to `next`.
    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    /// Old indices absent from `next`, ascending.
    pub fn removed(&self) -> &[usize] {
        &self.removed
    }

    pub fn kept(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, ScriptEntry::Keep { .. }))
            .count()
    }

    pub fn moved(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, ScriptEntry::Move { .. }))
            .count()
    }

    pub fn inserted(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, ScriptEntry::Insert))
            .count()
    }

    /// True when the script changes nothing.
    pub fn is_identity(&self) -> bool {
        self.removed.is_empty()
            && self
                .entries
                .iter()
                .all(|entry| matches!(entry, ScriptEntry::Keep { .. }))
    }

    /// Drive a renderer sink.
    ///
    /// Removals first, ascending. Then `next` is walked right-to-left; each
    /// insert or move is anchored on the following position, which has
    /// already been placed, so the sink can always insert-before a settled
    /// item (or append when the anchor is `None`). Keeps emit nothing.
    pub fn apply<S: ApplySink>(&self, sink: &mut S) {
        for &old in &self.removed {
            sink.remove(old);
        }

        for position in (0..self.entries.len()).rev() {
            let anchor = if position + 1 < self.entries.len() {
                Some(position + 1)
            } else {
                None
            };
            match self.entries[position] {
                ScriptEntry::Keep { .. } => {}
                ScriptEntry::Move { old } => sink.move_item(old, position, anchor),
                ScriptEntry::Insert => sink.insert(position, anchor),
            }
        }
    }
}

/// Renderer-supplied consumer for [`EditScript::apply`].
///
/// `anchor` is the `next` position to place before; `None` means the end of
/// the sequence. By the time an operation fires, the item holding the
/// anchor position is already in place.
pub trait ApplySink {
    /// A fresh item enters at `position`.
    fn insert(&mut self, position: usize, anchor: Option<usize>);
    /// The item previously at `old_index` is repositioned to `position`.
    fn move_item(&mut self, old_index: usize, position: usize, anchor: Option<usize>);
    /// The item previously at `old_index` leaves.
    fn remove(&mut self, old_index: usize);
}

/// Compute the minimal edit script turning `prev` into `next`.
///
/// Duplicate keys are paired positionally: the first repeat in `next`
/// claims the first occurrence in `prev`, and so on. Runs in O(n log n).
pub fn reconcile<K: Hash + Eq>(prev: &[K], next: &[K]) -> EditScript {
    // Key -> not-yet-claimed old positions, in order.
    let mut old_positions: HashMap<&K, VecDeque<usize>> = HashMap::new();
    for (index, key) in prev.iter().enumerate() {
        old_positions.entry(key).or_default().push_back(index);
    }

    // Old index (or sentinel) for every position of `next`.
    let old_index: Vec<Option<usize>> = next
        .iter()
        .map(|key| {
            old_positions
                .get_mut(key)
                .and_then(|positions| positions.pop_front())
        })
        .collect();

    let mut in_lis = vec![false; next.len()];
    for position in lis::longest_increasing_positions(&old_index) {
        in_lis[position] = true;
    }

    let mut used = vec![false; prev.len()];
    for &old in old_index.iter().flatten() {
        used[old] = true;
    }

    let entries = old_index
        .iter()
        .enumerate()
        .map(|(position, slot)| match slot {
            Some(old) if in_lis[position] => ScriptEntry::Keep { old: *old },
            Some(old) => ScriptEntry::Move { old: *old },
            None => ScriptEntry::Insert,
        })
        .collect();

    let removed = used
        .iter()
        .enumerate()
        .filter_map(|(index, claimed)| (!claimed).then_some(index))
        .collect();

    EditScript { entries, removed }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_produce_identity_script() {
        let keys = ["a", "b", "c"];
        let script = reconcile(&keys, &keys);

        assert!(script.is_identity());
        assert_eq!(script.kept(), 3);
        assert_eq!(script.moved(), 0);
        assert_eq!(script.inserted(), 0);
        assert!(script.removed().is_empty());
    }

    #[test]
    fn single_inversion_moves_exactly_one() {
        let script = reconcile(&["a", "b", "c", "d", "e"], &["a", "c", "b", "d", "e"]);

        assert_eq!(script.moved(), 1);
        assert_eq!(script.kept(), 4);
        assert_eq!(script.inserted(), 0);
        assert!(script.removed().is_empty());
    }

    #[test]
    fn empty_prev_is_all_inserts() {
        let script = reconcile::<&str>(&[], &["x", "y", "z"]);

        assert_eq!(script.inserted(), 3);
        assert_eq!(script.moved(), 0);
        assert_eq!(script.kept(), 0);
        assert!(script.removed().is_empty());
    }

    #[test]
    fn dropped_key_is_removed_without_moves() {
        let script = reconcile(&["a", "b", "c"], &["a", "c"]);

        // [0, 2] is already increasing
        assert_eq!(
            script.entries(),
            &[ScriptEntry::Keep { old: 0 }, ScriptEntry::Keep { old: 2 }]
        );
        assert_eq!(script.removed(), &[1]);
    }

    #[test]
    fn full_reversal_keeps_only_one() {
        let script = reconcile(&["a", "b", "c", "d"], &["d", "c", "b", "a"]);

        assert_eq!(script.kept(), 1);
        assert_eq!(script.moved(), 3);
    }

    #[test]
    fn duplicate_keys_pair_positionally() {
        let script = reconcile(&["a", "x", "a"], &["a", "a", "y"]);

        // First "a" claims old 0, second claims old 2; "x" leaves, "y" arrives
        assert_eq!(
            script.entries(),
            &[
                ScriptEntry::Keep { old: 0 },
                ScriptEntry::Keep { old: 2 },
                ScriptEntry::Insert,
            ]
        );
        assert_eq!(script.removed(), &[1]);
    }

    // ------------------------------------------------------------------
    // Apply simulation: drive a model renderer and check the final order
    // ------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Item {
        Old(usize),
        New(usize),
    }

    /// Model renderer: a working sequence plus a map from item to its
    /// final position, mimicking a DOM-style insert-before interface.
    struct ModelSink {
        working: Vec<Item>,
        final_position: HashMap<Item, usize>,
    }

    impl ModelSink {
        fn new(prev_len: usize, script: &EditScript) -> Self {
            let working = (0..prev_len).map(Item::Old).collect();
            let mut final_position = HashMap::new();
            for (position, entry) in script.entries().iter().enumerate() {
                let item = match entry {
                    ScriptEntry::Keep { old } | ScriptEntry::Move { old } => Item::Old(*old),
                    ScriptEntry::Insert => Item::New(position),
                };
                final_position.insert(item, position);
            }
            Self {
                working,
                final_position,
            }
        }

        fn slot_before(&self, anchor: Option<usize>) -> usize {
            match anchor {
                Some(final_pos) => self
                    .working
                    .iter()
                    .position(|item| self.final_position.get(item) == Some(&final_pos))
                    .expect("anchor must already be placed"),
                None => self.working.len(),
            }
        }
    }

    impl ApplySink for ModelSink {
        fn insert(&mut self, position: usize, anchor: Option<usize>) {
            let at = self.slot_before(anchor);
            self.working.insert(at, Item::New(position));
        }

        fn move_item(&mut self, old_index: usize, _position: usize, anchor: Option<usize>) {
            let from = self
                .working
                .iter()
                .position(|item| *item == Item::Old(old_index))
                .expect("moved item must exist");
            let item = self.working.remove(from);
            let at = self.slot_before(anchor);
            self.working.insert(at, item);
        }

        fn remove(&mut self, old_index: usize) {
            self.working.retain(|item| *item != Item::Old(old_index));
        }
    }

    fn apply_and_collect<'k>(prev: &[&'k str], next: &[&'k str]) -> Vec<&'k str> {
        let script = reconcile(prev, next);
        let mut sink = ModelSink::new(prev.len(), &script);
        script.apply(&mut sink);
        sink.working
            .iter()
            .map(|item| match item {
                Item::Old(index) => prev[*index],
                Item::New(position) => next[*position],
            })
            .collect()
    }

    #[test]
    fn applying_the_script_yields_next_exactly() {
        let prev = ["a", "b", "c", "d", "e", "f"];
        let next = ["f", "a", "d", "x", "b"];
        assert_eq!(apply_and_collect(&prev, &next), next);
    }

    #[test]
    fn applying_handles_churn_with_duplicates() {
        let prev = ["a", "b", "a", "c"];
        let next = ["c", "a", "a", "b", "a"];
        assert_eq!(apply_and_collect(&prev, &next), next);
    }

    #[test]
    fn applying_an_identity_script_touches_nothing() {
        let prev = ["a", "b"];
        let script = reconcile(&prev, &prev);
        let mut sink = ModelSink::new(prev.len(), &script);
        script.apply(&mut sink);
        assert_eq!(sink.working, vec![Item::Old(0), Item::Old(1)]);
    }

    #[test]
    fn scripts_bridge_through_serde() {
        let script = reconcile(&["a", "b"], &["b", "c"]);

        let bridged = serde_json::to_value(&script).unwrap();
        assert_eq!(
            bridged,
            serde_json::json!({
                "entries": [{ "keep": { "old": 1 } }, "insert"],
                "removed": [0],
            })
        );

        let back: EditScript = serde_json::from_value(bridged).unwrap();
        assert_eq!(back, script);
    }
}
