//! Generic three-way map merge.
//!
//! Every merge level in the engine (file sets, data lines, settings values,
//! path lists) reduces to the same question: given a common ancestor map and
//! two descendant maps, which value does each key end up with? This module
//! answers it once.
//!
//! # Rules
//!
//! For each key in the union (parent's keys in order, then keys only `first`
//! has, then keys only `second` has), with absence treated as a value:
//!
//! 1. The resolver's [`ConflictResolver::preempt`] hook may decide outright.
//! 2. `first == second` → that value (including "both deleted").
//! 3. `parent == first` → `second` (only `second` changed it).
//! 4. `parent == second` → `first` (only `first` changed it).
//! 5. Otherwise both sides changed it differently: a true conflict, settled by
//!    [`ConflictResolver::resolve`]. Returning `None` drops the key.

use std::hash::Hash;

use indexmap::IndexMap;

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Outcome of [`ConflictResolver::preempt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Preempt<V> {
    /// Fall through to the standard three-way rules.
    Proceed,
    /// Use this value (`None` drops the key) without consulting the rules.
    Decide(Option<V>),
}

/// Settles keys that both sides changed differently.
///
/// Any `FnMut(&K, Option<&V>, Option<&V>, Option<&V>) -> Option<V>` closure is
/// a resolver, which keeps one-off policies inline at the call site.
pub trait ConflictResolver<K, V> {
    /// Consulted for every key before the equality rules.
    fn preempt(
        &mut self,
        _key: &K,
        _parent: Option<&V>,
        _first: Option<&V>,
        _second: Option<&V>,
    ) -> Preempt<V> {
        Preempt::Proceed
    }

    /// Pick the value for a truly conflicting key, or `None` to drop it.
    fn resolve(
        &mut self,
        key: &K,
        parent: Option<&V>,
        first: Option<&V>,
        second: Option<&V>,
    ) -> Option<V>;
}

impl<K, V, F> ConflictResolver<K, V> for F
where
    F: FnMut(&K, Option<&V>, Option<&V>, Option<&V>) -> Option<V>,
{
    fn resolve(
        &mut self,
        key: &K,
        parent: Option<&V>,
        first: Option<&V>,
        second: Option<&V>,
    ) -> Option<V> {
        self(key, parent, first, second)
    }
}

/// Conflicts go to `second`, the later fork.
#[derive(Clone, Copy, Debug, Default)]
pub struct LatestWins;

impl<K, V: Clone> ConflictResolver<K, V> for LatestWins {
    fn resolve(&mut self, _: &K, _: Option<&V>, _: Option<&V>, second: Option<&V>) -> Option<V> {
        second.cloned()
    }
}

/// Conflicts go to `first`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreferFirst;

impl<K, V: Clone> ConflictResolver<K, V> for PreferFirst {
    fn resolve(&mut self, _: &K, _: Option<&V>, first: Option<&V>, _: Option<&V>) -> Option<V> {
        first.cloned()
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Result of [`merge_maps`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapMergeOutcome<K: Hash + Eq, V> {
    /// The merged map, in union key order.
    pub merged: IndexMap<K, V>,
    /// Keys that reached [`ConflictResolver::resolve`], in merge order.
    pub conflicts: Vec<K>,
}

/// Three-way merge of `first` and `second` against their common `parent`.
pub fn merge_maps<K, V, R>(
    parent: &IndexMap<K, V>,
    first: &IndexMap<K, V>,
    second: &IndexMap<K, V>,
    resolver: &mut R,
) -> MapMergeOutcome<K, V>
where
    K: Hash + Eq + Clone,
    V: PartialEq + Clone,
    R: ConflictResolver<K, V> + ?Sized,
{
    let keys = parent
        .keys()
        .chain(first.keys().filter(|k| !parent.contains_key(*k)))
        .chain(
            second
                .keys()
                .filter(|k| !parent.contains_key(*k) && !first.contains_key(*k)),
        );

    let mut merged = IndexMap::with_capacity(first.len().max(second.len()));
    let mut conflicts = Vec::new();

    for key in keys {
        let (p, f, s) = (parent.get(key), first.get(key), second.get(key));
        let value = match resolver.preempt(key, p, f, s) {
            Preempt::Decide(value) => value,
            Preempt::Proceed if f == s => f.cloned(),
            Preempt::Proceed if p == f => s.cloned(),
            Preempt::Proceed if p == s => f.cloned(),
            Preempt::Proceed => {
                conflicts.push(key.clone());
                resolver.resolve(key, p, f, s)
            }
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }

    MapMergeOutcome { merged, conflicts }
}
