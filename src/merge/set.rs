//! Three-way set merge on top of [`merge_maps`].

use std::hash::Hash;

use indexmap::IndexMap;

use super::map::{ConflictResolver, merge_maps};

/// Membership marker: a set is a map whose only value is "present".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Present;

/// With a single possible value, two sides that differ from each other cannot
/// both differ from the parent, so this is never called. It prefers `second`
/// to stay consistent with the other latest-wins policies.
struct Unreachable;

impl<T> ConflictResolver<T, Present> for Unreachable {
    fn resolve(
        &mut self,
        _: &T,
        _: Option<&Present>,
        _: Option<&Present>,
        second: Option<&Present>,
    ) -> Option<Present> {
        second.copied()
    }
}

/// Merge three element lists.
///
/// An element survives unless one side removed it and the other left it as
/// the parent had it. Output order is first-seen across `parent`, `first`,
/// `second`; duplicates within one input collapse.
pub fn merge_sets<T>(parent: &[T], first: &[T], second: &[T]) -> Vec<T>
where
    T: Hash + Eq + Clone,
{
    let as_map = |items: &[T]| -> IndexMap<T, Present> {
        items.iter().map(|item| (item.clone(), Present)).collect()
    };
    merge_maps(&as_map(parent), &as_map(first), &as_map(second), &mut Unreachable)
        .merged
        .into_keys()
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn strs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn additions_from_both_sides_are_kept() {
        let merged = merge_sets(&strs(&["a"]), &strs(&["a", "b"]), &strs(&["a", "c"]));
        assert_eq!(merged, strs(&["a", "b", "c"]));
    }

    #[test]
    fn removal_on_one_side_wins() {
        let merged = merge_sets(&strs(&["a", "b"]), &strs(&["b"]), &strs(&["a", "b", "c"]));
        assert_eq!(merged, strs(&["b", "c"]));
    }

    #[test]
    fn duplicates_collapse() {
        let merged = merge_sets(&strs(&[]), &strs(&["x", "x"]), &strs(&["x"]));
        assert_eq!(merged, strs(&["x"]));
    }

    proptest! {
        #[test]
        fn membership_follows_three_way_rule(
            parent in prop::collection::vec(0u8..10, 0..10),
            first in prop::collection::vec(0u8..10, 0..10),
            second in prop::collection::vec(0u8..10, 0..10),
        ) {
            let merged = merge_sets(&parent, &first, &second);
            for x in 0u8..10 {
                let (p, f, s) = (parent.contains(&x), first.contains(&x), second.contains(&x));
                let expected = if f == s { f } else if p == f { s } else { f };
                prop_assert_eq!(merged.contains(&x), expected, "element {}", x);
            }
            let mut deduped = merged.clone();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), merged.len());
        }
    }
}
