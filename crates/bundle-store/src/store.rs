//! The [`BundleStore`] trait.

use crate::bundle::{BundleId, BundleManifest, BundleSpec};
use crate::collection::ResourceCollection;
use crate::error::Result;

/// Read access to the fork-history DAG.
///
/// Split out of [`BundleStore`] so ancestor search can walk a store while the
/// caller still holds it mutably for publication.
#[allow(clippy::missing_errors_doc)]
pub trait BundleGraph {
    /// Parents of `id`. Empty for a root bundle.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if `id`
    /// is not in the store.
    fn parents(&self, id: &BundleId) -> Result<Vec<BundleId>>;
}

/// A store of immutable, checksummed bundle snapshots.
///
/// # Invariants
///
/// - A bundle becomes visible (`list`, `collection`, `manifest`) only after
///   all of its content has been stored.
/// - Published bundles never change.
#[allow(clippy::missing_errors_doc)]
pub trait BundleStore: BundleGraph {
    /// Open a published bundle's content.
    fn collection(&self, id: &BundleId) -> Result<Box<dyn ResourceCollection>>;

    /// The manifest of a published bundle.
    fn manifest(&self, id: &BundleId) -> Result<BundleManifest>;

    /// Publish a new bundle and return its identifier.
    ///
    /// Every name in `spec.filenames` must exist in `spec.source`.
    fn store_bundle(&mut self, spec: BundleSpec<'_>) -> Result<BundleId>;

    /// All published bundles, sorted.
    fn list(&self) -> Result<Vec<BundleId>>;

    /// All published bundles with the given logical name, sorted.
    fn list_named(&self, name: &str) -> Result<Vec<BundleId>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|id| id.name() == name)
            .collect())
    }
}
