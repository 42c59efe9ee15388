//! File-level merge of three collections into a destination.
//!
//! Planning runs [`merge_maps`] over `filename → FileState` maps built from
//! checksums alone, so unchanged files are never read. Saving then copies
//! each planned file verbatim or hands it to its content handler.

use std::fmt;

use bundle_store::{ResourceCollection, StoreError, copy_resource};
use indexmap::IndexMap;
use serde::Serialize;

use crate::handlers::{ContentHandler, HandlerError, HandlerRegistry};

use super::map::{ConflictResolver, Preempt, merge_maps};
use super::{MergeSources, Side};

// ---------------------------------------------------------------------------
// FileState
// ---------------------------------------------------------------------------

/// What the merged bundle holds for one filename.
#[derive(Clone, Copy, Debug)]
pub enum FileState {
    /// Take the file as-is from `side`.
    Source {
        /// Where the bytes come from.
        side: Side,
        /// Content checksum on that side.
        checksum: u64,
    },
    /// Both forks changed the file; produce it with a content handler.
    Merge {
        /// The handler that will merge it.
        handler: ContentHandler,
    },
}

/// Content equality: two sources holding the same bytes are the same state,
/// whichever side they came from.
impl PartialEq for FileState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Source { checksum: a, .. }, Self::Source { checksum: b, .. }) => a == b,
            (Self::Merge { handler: a }, Self::Merge { handler: b }) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What a bundle merge did, per file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BundleMergeReport {
    /// Files both forks changed differently, i.e. that required a merge.
    pub merged: Vec<String>,
    /// Conflicting files with no handler; `second`'s copy was kept.
    pub overwritten: Vec<String>,
    /// Files copied verbatim from one input.
    pub copied: Vec<String>,
}

impl BundleMergeReport {
    /// Files that needed a content merge (had a handler).
    pub fn content_merged(&self) -> impl Iterator<Item = &str> {
        self.merged
            .iter()
            .filter(|name| !self.overwritten.contains(name))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure while merging three bundles.
#[derive(Debug)]
pub enum BundleMergeError {
    /// Listing, reading or copying through a collection failed.
    Store(StoreError),
    /// A content handler failed on `file`.
    Handler {
        /// The file being merged.
        file: String,
        /// The underlying failure.
        source: HandlerError,
    },
}

impl fmt::Display for BundleMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Handler { file, source } => write!(f, "merging `{file}`: {source}"),
        }
    }
}

impl std::error::Error for BundleMergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Handler { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for BundleMergeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// BundleMerger
// ---------------------------------------------------------------------------

/// Merges three collections file by file.
#[derive(Clone, Debug, Default)]
pub struct BundleMerger {
    registry: HandlerRegistry,
}

/// Deletion and conflict policy for filenames.
struct FileResolver<'a> {
    registry: &'a HandlerRegistry,
    report: &'a mut BundleMergeReport,
}

impl ConflictResolver<String, FileState> for FileResolver<'_> {
    /// A file missing from one fork is taken from the other, even if the
    /// missing side is the one that changed relative to the parent.
    fn preempt(
        &mut self,
        _: &String,
        _: Option<&FileState>,
        first: Option<&FileState>,
        second: Option<&FileState>,
    ) -> Preempt<FileState> {
        match (first, second) {
            (None, Some(kept)) | (Some(kept), None) => Preempt::Decide(Some(*kept)),
            _ => Preempt::Proceed,
        }
    }

    fn resolve(
        &mut self,
        name: &String,
        _: Option<&FileState>,
        _: Option<&FileState>,
        second: Option<&FileState>,
    ) -> Option<FileState> {
        self.report.merged.push(name.clone());
        if let Some(handler) = self.registry.select(name) {
            tracing::debug!(file = %name, %handler, "both forks changed file; merging content");
            return Some(FileState::Merge { handler });
        }
        tracing::warn!(file = %name, "no merge handler for conflicting file; keeping second fork's copy");
        self.report.overwritten.push(name.clone());
        second.copied()
    }
}

impl BundleMerger {
    /// A merger dispatching through `registry`.
    #[must_use]
    pub const fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// The handler table in use.
    #[must_use]
    pub const fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Decide, per filename, where the merged file comes from. Reads
    /// checksums only.
    ///
    /// # Errors
    /// Returns [`BundleMergeError::Store`] if a collection cannot be listed.
    pub fn plan(
        &self,
        sources: &MergeSources<'_>,
    ) -> Result<(IndexMap<String, FileState>, BundleMergeReport), BundleMergeError> {
        let parent = file_states(sources.parent, Side::Parent)?;
        let first = file_states(sources.first, Side::First)?;
        let second = file_states(sources.second, Side::Second)?;

        let mut report = BundleMergeReport::default();
        let outcome = merge_maps(
            &parent,
            &first,
            &second,
            &mut FileResolver {
                registry: &self.registry,
                report: &mut report,
            },
        );
        Ok((outcome.merged, report))
    }

    /// Merge `sources` into `dest` and report what happened.
    ///
    /// # Errors
    /// Returns [`BundleMergeError`] on any read, write or handler failure.
    /// `dest` may then hold a partial result.
    pub fn merge(
        &self,
        sources: &MergeSources<'_>,
        dest: &mut dyn ResourceCollection,
    ) -> Result<BundleMergeReport, BundleMergeError> {
        let (plan, mut report) = self.plan(sources)?;
        for (name, state) in &plan {
            match *state {
                FileState::Source { side, .. } => {
                    tracing::debug!(file = %name, %side, "copying");
                    copy_resource(sources.get(side), dest, name)?;
                    report.copied.push(name.clone());
                }
                FileState::Merge { handler } => {
                    self.registry
                        .merge_file(handler, name, sources, dest)
                        .map_err(|source| BundleMergeError::Handler {
                            file: name.clone(),
                            source,
                        })?;
                }
            }
        }
        Ok(report)
    }
}

fn file_states(
    collection: &dyn ResourceCollection,
    side: Side,
) -> Result<IndexMap<String, FileState>, StoreError> {
    let mut states = IndexMap::new();
    for name in collection.list_names()? {
        if let Some(checksum) = collection.checksum(&name)? {
            states.insert(name, FileState::Source { side, checksum });
        }
    }
    Ok(states)
}
