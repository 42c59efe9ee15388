//! Storage boundary for bundlemerge.
//!
//! The merge engine never touches the filesystem layout of a bundle directly.
//! It programs against the traits defined here:
//!
//! - [`ResourceCollection`]: a named set of byte blobs with checksums and
//!   timestamps.
//! - [`BundleStore`]: immutable snapshots of collections, identified by
//!   [`BundleId`] and linked to their parents (a DAG).
//! - [`AncestorSearch`]: bounded common-ancestor discovery over that DAG.
//!
//! # Crate layout
//!
//! - [`collection`]: the collection trait, checksums, verbatim copy.
//! - [`bundle`]: bundle identifiers, manifests, publication specs.
//! - [`store`]: the bundle store trait.
//! - [`memory`]: in-memory collections and store (tests, embedding).
//! - [`dir`]: directory-backed collections and store.
//! - [`ancestry`]: bounded breadth-first ancestor search.
//! - [`error`]: the [`StoreError`] enum returned by everything above.

pub mod ancestry;
pub mod bundle;
pub mod collection;
pub mod dir;
pub mod error;
pub mod memory;
pub mod store;

pub use ancestry::{AncestorSearch, BoundedAncestorSearch};
pub use bundle::{BundleId, BundleManifest, BundleSpec, ManifestEntry, Retention};
pub use collection::{
    EmptyCollection, ResourceCollection, ResourceSink, content_checksum, copy_resource,
    validate_resource_name,
};
pub use dir::{DirBundleStore, DirCollection};
pub use error::{Result, StoreError};
pub use memory::{MemoryBundleStore, MemoryCollection};
pub use store::{BundleGraph, BundleStore};
