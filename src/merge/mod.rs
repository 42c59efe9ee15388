//! Three-way reconciliation of forked bundles.
//!
//! Layers, bottom-up:
//!
//! - [`map`]: the generic three-way map merge every other layer reuses.
//! - [`set`]: membership merge built on [`map`].
//! - [`crate::handlers`]: format-aware merges for individual files.
//! - [`bundle`]: file-level merge of three collections into a destination.
//! - [`coordinator`]: N-way reduction of forks into one published bundle.
//!
//! # Determinism
//!
//! Given the same store contents and fork list, a merge produces the same
//! file bytes. Forks are processed in [`BundleId`](bundle_store::BundleId)
//! order. Files are planned in map-merge key order: the parent's names
//! (sorted), then names only `first` has, then names only `second` has.
//! Merged timestamps are taken from the inputs rather than the clock.

pub mod bundle;
pub mod coordinator;
pub mod map;
pub mod set;

use std::fmt;

use bundle_store::ResourceCollection;
use serde::Serialize;

pub use bundle::{BundleMergeError, BundleMergeReport, BundleMerger, FileState};
pub use coordinator::{CoordinatorError, MergeCoordinator, MergeOutcome, RoundReport};
pub use map::{ConflictResolver, LatestWins, MapMergeOutcome, PreferFirst, Preempt, merge_maps};
pub use set::merge_sets;

/// Which input of a three-way merge something came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    /// The common ancestor.
    Parent,
    /// The earlier fork.
    First,
    /// The later fork.
    Second,
}

impl Side {
    /// All sides in output order.
    pub const ALL: [Self; 3] = [Self::Parent, Self::First, Self::Second];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::First => write!(f, "first"),
            Self::Second => write!(f, "second"),
        }
    }
}

/// The three collections one merge reads from.
#[derive(Clone, Copy)]
pub struct MergeSources<'a> {
    /// Common ancestor content (possibly empty).
    pub parent: &'a dyn ResourceCollection,
    /// Earlier fork.
    pub first: &'a dyn ResourceCollection,
    /// Later fork.
    pub second: &'a dyn ResourceCollection,
}

impl<'a> MergeSources<'a> {
    /// The collection for `side`.
    #[must_use]
    pub fn get(&self, side: Side) -> &'a dyn ResourceCollection {
        match side {
            Side::Parent => self.parent,
            Side::First => self.first,
            Side::Second => self.second,
        }
    }
}

impl fmt::Debug for MergeSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSources").finish_non_exhaustive()
    }
}
