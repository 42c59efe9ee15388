//! N-way reduction of forks into one published merge snapshot.
//!
//! Forks are folded pairwise, earliest-created first: the running result is
//! `first`, the next fork is `second`, and their nearest shared ancestor is
//! `parent`. Intermediate results live in a scratch directory that is removed
//! when the call returns, successful or not. The store sees exactly one
//! `store_bundle` call, after every round has succeeded.

use std::fmt;
use std::path::PathBuf;

use bundle_store::{
    AncestorSearch, BoundedAncestorSearch, BundleId, BundleSpec, BundleStore, DirCollection,
    EmptyCollection, ResourceCollection, Retention, StoreError,
};
use serde::Serialize;
use tracing::{info, info_span, warn};

use super::MergeSources;
use super::bundle::{BundleMergeError, BundleMergeReport, BundleMerger};

/// Default generations searched from each fork for a shared ancestor.
pub const DEFAULT_ANCESTOR_SEARCH_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// One pairwise round of a reduction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// The fork merged into the running result.
    pub fork: BundleId,
    /// The ancestor it was merged against, if one was found.
    pub ancestor: Option<BundleId>,
    /// Per-file detail.
    pub report: BundleMergeReport,
}

/// Result of [`MergeCoordinator::merge_forks`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// The published merge snapshot, or the input when there was one fork.
    pub bundle: BundleId,
    /// Rounds in processing order; empty for a single fork.
    pub rounds: Vec<RoundReport>,
}

impl MergeOutcome {
    /// Every file that required a merge in any round, deduplicated.
    #[must_use]
    pub fn files_requiring_merge(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self
            .rounds
            .iter()
            .flat_map(|r| r.report.merged.iter().map(String::as_str))
            .collect();
        files.sort_unstable();
        files.dedup();
        files
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a coordinated merge. Nothing is published when one is returned.
#[derive(Debug)]
pub enum CoordinatorError {
    /// No fork IDs were supplied.
    NoForks,
    /// The forks belong to different logical bundles.
    MixedBundles {
        /// Name of the first fork.
        expected: String,
        /// The offending fork.
        found: BundleId,
    },
    /// The scratch directory could not be created.
    Scratch(std::io::Error),
    /// The store or ancestor search failed.
    Store(StoreError),
    /// A pairwise merge failed.
    Merge {
        /// The fork being merged in when it failed.
        fork: BundleId,
        /// The underlying failure.
        source: BundleMergeError,
    },
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoForks => write!(f, "no forks to merge"),
            Self::MixedBundles { expected, found } => write!(
                f,
                "fork `{found}` belongs to bundle `{}`, expected `{expected}`",
                found.name()
            ),
            Self::Scratch(e) => write!(f, "could not create scratch directory: {e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Merge { fork, source } => write!(f, "merging fork `{fork}`: {source}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoForks | Self::MixedBundles { .. } => None,
            Self::Scratch(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Merge { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Reduces forks of one bundle to a single published merge snapshot.
pub struct MergeCoordinator<'a, S, A = BoundedAncestorSearch>
where
    S: BundleStore,
    A: AncestorSearch + ?Sized,
{
    store: &'a mut S,
    search: &'a A,
    merger: BundleMerger,
    max_depth: usize,
    scratch_root: Option<PathBuf>,
}

impl<'a, S: BundleStore> MergeCoordinator<'a, S> {
    /// A coordinator with the default search, handlers and depth.
    pub fn new(store: &'a mut S) -> Self {
        Self::with_search(store, &BoundedAncestorSearch)
    }
}

impl<'a, S, A> MergeCoordinator<'a, S, A>
where
    S: BundleStore,
    A: AncestorSearch + ?Sized,
{
    /// A coordinator using `search` to find ancestors.
    pub fn with_search(store: &'a mut S, search: &'a A) -> Self {
        Self {
            store,
            search,
            merger: BundleMerger::default(),
            max_depth: DEFAULT_ANCESTOR_SEARCH_DEPTH,
            scratch_root: None,
        }
    }

    /// Use `merger` for the pairwise rounds.
    #[must_use]
    pub fn merger(mut self, merger: BundleMerger) -> Self {
        self.merger = merger;
        self
    }

    /// Search at most `depth` generations from each side.
    #[must_use]
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    #[must_use]
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Merge `forks` and publish the result.
    ///
    /// A single fork (after removing duplicates) is returned as-is without
    /// publishing. Otherwise the new bundle lists every distinct input fork
    /// as a parent, in the order given, and is retained permanently.
    ///
    /// # Errors
    /// Returns [`CoordinatorError`] if the input is empty or mixes bundles,
    /// or if any read, merge or publish step fails. Nothing is published in
    /// that case.
    pub fn merge_forks(&mut self, forks: &[BundleId]) -> Result<MergeOutcome, CoordinatorError> {
        let Some(head) = forks.first() else {
            return Err(CoordinatorError::NoForks);
        };
        let name = head.name().to_owned();
        if let Some(other) = forks.iter().find(|f| f.name() != name) {
            return Err(CoordinatorError::MixedBundles {
                expected: name,
                found: other.clone(),
            });
        }

        let mut parents: Vec<BundleId> = Vec::with_capacity(forks.len());
        for fork in forks {
            if !parents.contains(fork) {
                parents.push(fork.clone());
            }
        }
        let mut ordered = parents.clone();
        ordered.sort();

        let [only] = ordered.as_slice() else {
            return self.reduce(&name, &ordered, parents);
        };
        Ok(MergeOutcome {
            bundle: only.clone(),
            rounds: Vec::new(),
        })
    }

    fn reduce(
        &mut self,
        name: &str,
        ordered: &[BundleId],
        parents: Vec<BundleId>,
    ) -> Result<MergeOutcome, CoordinatorError> {
        let span = info_span!("merge_forks", bundle = name, forks = ordered.len());
        let _enter = span.enter();

        let scratch = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(".bundlemerge-");
            match &self.scratch_root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
        }
        .map_err(CoordinatorError::Scratch)?;

        let mut left: Box<dyn ResourceCollection> = self.store.collection(&ordered[0])?;
        let mut anchor = ordered[0].clone();
        let mut rounds = Vec::with_capacity(ordered.len() - 1);

        for (round, fork) in ordered.iter().enumerate().skip(1) {
            let _round = info_span!("round", round, fork = %fork).entered();

            let ancestor =
                self.search
                    .find_shared_ancestor(&*self.store, &anchor, fork, self.max_depth)?;
            let parent: Box<dyn ResourceCollection> = match &ancestor {
                Some(id) => match self.store.collection(id) {
                    Ok(collection) => {
                        tracing::debug!(ancestor = %id, "merging against shared ancestor");
                        collection
                    }
                    Err(e) if e.is_not_found() => {
                        warn!(ancestor = %id, "shared ancestor was collected; merging against empty parent");
                        Box::new(EmptyCollection)
                    }
                    Err(e) => return Err(e.into()),
                },
                None => {
                    warn!(
                        anchor = %anchor,
                        max_depth = self.max_depth,
                        "no shared ancestor found; merging against empty parent"
                    );
                    Box::new(EmptyCollection)
                }
            };
            let right = self.store.collection(fork)?;

            let mut dest = DirCollection::writable(scratch.path().join(format!("round-{round}")));
            let report = self
                .merger
                .merge(
                    &MergeSources {
                        parent: parent.as_ref(),
                        first: left.as_ref(),
                        second: right.as_ref(),
                    },
                    &mut dest,
                )
                .map_err(|source| CoordinatorError::Merge {
                    fork: fork.clone(),
                    source,
                })?;
            drop((parent, right));

            left = Box::new(dest.into_read_only());
            if let Some(id) = &ancestor {
                anchor = id.clone();
            }
            rounds.push(RoundReport {
                fork: fork.clone(),
                ancestor,
                report,
            });
        }

        let filenames = left.list_names()?;
        let bundle = self.store.store_bundle(BundleSpec {
            name,
            source: left.as_ref(),
            filenames,
            parents,
            retention: Retention::Permanent,
        })?;
        info!(bundle = %bundle, rounds = rounds.len(), "published merge snapshot");

        Ok(MergeOutcome { bundle, rounds })
    }
}
