//! Directory-backed collections and bundle store.
//!
//! Layout of a [`DirBundleStore`] root:
//!
//! ```text
//! <root>/
//!   <bundle-id>/          one flat directory of files per bundle
//!   <bundle-id>.json      manifest (parents, retention, checksums)
//! ```
//!
//! A bundle is published by filling a hidden staging directory, renaming it
//! into place, and writing the manifest last. Anything without a manifest is
//! invisible to readers, so a crash mid-publish leaves no half-bundle behind.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::bundle::{
    BundleId, BundleManifest, BundleSpec, ManifestEntry, Retention, creation_stamp,
    millis_since_epoch,
};
use crate::collection::{
    ResourceCollection, ResourceSink, content_checksum, copy_resource, validate_resource_name,
};
use crate::error::{Result, StoreError};
use crate::store::{BundleGraph, BundleStore};

const MANIFEST_EXT: &str = "json";

// ---------------------------------------------------------------------------
// DirCollection
// ---------------------------------------------------------------------------

/// A [`ResourceCollection`] over one flat directory.
///
/// Hidden entries (leading `.`) and subdirectories are ignored. A missing
/// directory reads as an empty collection and is created on first write.
#[derive(Clone, Debug)]
pub struct DirCollection {
    root: PathBuf,
    writable: bool,
}

impl DirCollection {
    /// A read-only view of `root`.
    #[must_use]
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: false,
        }
    }

    /// A writable view of `root`.
    #[must_use]
    pub fn writable(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: true,
        }
    }

    /// Drop write access.
    #[must_use]
    pub fn into_read_only(self) -> Self {
        Self::read_only(self.root)
    }

    /// The directory this collection reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_resource_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Map `NotFound` to `None`, keep every other error.
fn optional<T>(result: io::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ResourceCollection for DirCollection {
    fn list_names(&self) -> Result<Vec<String>> {
        let Some(entries) = optional(fs::read_dir(&self.root))? else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(dir = %self.root.display(), "skipping non-UTF-8 file name");
                continue;
            };
            if validate_resource_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn checksum(&self, name: &str) -> Result<Option<u64>> {
        let path = self.path_of(name)?;
        Ok(optional(fs::read(path))?.map(|bytes| content_checksum(&bytes)))
    }

    fn last_modified(&self, name: &str) -> Result<Option<SystemTime>> {
        let path = self.path_of(name)?;
        match optional(fs::metadata(path))? {
            Some(meta) => Ok(Some(meta.modified()?)),
            None => Ok(None),
        }
    }

    fn open_read(&self, name: &str) -> Result<Option<Box<dyn Read + '_>>> {
        let path = self.path_of(name)?;
        Ok(optional(File::open(path))?.map(|f| Box::new(f) as Box<dyn Read + '_>))
    }

    fn open_write(
        &mut self,
        name: &str,
        modified: SystemTime,
    ) -> Result<Box<dyn ResourceSink + '_>> {
        if !self.writable {
            return Err(StoreError::ReadOnly {
                name: name.to_owned(),
            });
        }
        let target = self.path_of(name)?;
        fs::create_dir_all(&self.root)?;
        let tmp = NamedTempFile::new_in(&self.root)?;
        Ok(Box::new(DirSink {
            tmp,
            target,
            modified,
        }))
    }
}

struct DirSink {
    tmp: NamedTempFile,
    target: PathBuf,
    modified: SystemTime,
}

impl Write for DirSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

impl ResourceSink for DirSink {
    fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            mut tmp,
            target,
            modified,
        } = *self;
        tmp.flush()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        filetime::set_file_mtime(&target, FileTime::from_system_time(modified))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DirBundleStore
// ---------------------------------------------------------------------------

/// A [`BundleStore`] laid out as plain directories under one root.
#[derive(Clone, Debug)]
pub struct DirBundleStore {
    root: PathBuf,
    device: String,
}

impl DirBundleStore {
    /// Open (creating if needed) a store rooted at `root`. Bundles published
    /// through this handle carry `device` in their IDs.
    ///
    /// # Errors
    /// Returns an I/O error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>, device: &str) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            device: device.to_owned(),
        })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_dir(&self, id: &BundleId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn manifest_path(&self, id: &BundleId) -> PathBuf {
        self.root.join(format!("{id}.{MANIFEST_EXT}"))
    }

    fn exists(&self, id: &BundleId) -> bool {
        self.manifest_path(id).exists() || self.content_dir(id).exists()
    }

    /// Publish `source` under a caller-chosen identity (fixtures, imports).
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidBundleId`] if `id` already exists, or any
    /// I/O error while copying.
    pub fn insert_bundle(
        &self,
        id: &BundleId,
        parents: Vec<BundleId>,
        source: &dyn ResourceCollection,
        retention: Retention,
    ) -> Result<()> {
        if self.exists(id) {
            return Err(StoreError::InvalidBundleId {
                value: id.to_string(),
                reason: "bundle already exists".to_owned(),
            });
        }
        let names = source.list_names()?;
        self.publish(id, parents, source, &names, retention)
    }

    fn publish(
        &self,
        id: &BundleId,
        parents: Vec<BundleId>,
        source: &dyn ResourceCollection,
        names: &[String],
        retention: Retention,
    ) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        let mut staged = DirCollection::writable(staging.path());
        let mut files = Vec::with_capacity(names.len());
        for name in names {
            if !source.contains(name)? {
                return Err(StoreError::not_found(format!(
                    "resource `{name}` in source for bundle `{id}`"
                )));
            }
            copy_resource(source, &mut staged, name)?;
            let checksum = staged.checksum(name)?.unwrap_or_default();
            let modified = staged
                .last_modified(name)?
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(ManifestEntry {
                name: name.clone(),
                checksum,
                modified_ms: millis_since_epoch(modified),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        // Rename the staging dir into place; the TempDir guard then finds
        // nothing left to clean up.
        fs::rename(staging.path(), self.content_dir(id))?;

        let manifest = BundleManifest {
            id: id.clone(),
            parents,
            retention,
            files,
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(|source| StoreError::Manifest {
            bundle: id.to_string(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(self.manifest_path(id)).map_err(|e| e.error)?;
        tracing::debug!(bundle = %id, files = manifest.files.len(), "published bundle");
        Ok(())
    }
}

impl BundleGraph for DirBundleStore {
    fn parents(&self, id: &BundleId) -> Result<Vec<BundleId>> {
        Ok(self.manifest(id)?.parents)
    }
}

impl BundleStore for DirBundleStore {
    fn collection(&self, id: &BundleId) -> Result<Box<dyn ResourceCollection>> {
        if !self.manifest_path(id).is_file() {
            return Err(StoreError::not_found(format!("bundle `{id}`")));
        }
        Ok(Box::new(DirCollection::read_only(self.content_dir(id))))
    }

    fn manifest(&self, id: &BundleId) -> Result<BundleManifest> {
        let Some(bytes) = optional(fs::read(self.manifest_path(id)))? else {
            return Err(StoreError::not_found(format!("bundle `{id}`")));
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Manifest {
            bundle: id.to_string(),
            source,
        })
    }

    fn store_bundle(&mut self, spec: BundleSpec<'_>) -> Result<BundleId> {
        let mut created = creation_stamp(&spec.parents);
        let mut id = BundleId::new(&self.device, created, spec.name)?;
        while self.exists(&id) {
            created += 1;
            id = BundleId::new(&self.device, created, spec.name)?;
        }
        self.publish(&id, spec.parents, spec.source, &spec.filenames, spec.retention)?;
        Ok(id)
    }

    fn list(&self) -> Result<Vec<BundleId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<BundleId>() {
                Ok(id) => ids.push(id),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring stray manifest"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::memory::MemoryCollection;

    fn id(s: &str) -> BundleId {
        s.parse().unwrap()
    }

    #[test]
    fn missing_directory_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let coll = DirCollection::read_only(dir.path().join("nope"));
        assert!(coll.list_names().unwrap().is_empty());
        assert!(coll.read_bytes("1.dat").unwrap().is_none());
        assert!(coll.checksum("1.dat").unwrap().is_none());
    }

    #[test]
    fn writes_preserve_timestamp_and_hide_temp_files() {
        let dir = TempDir::new().unwrap();
        let mut coll = DirCollection::writable(dir.path().join("c"));
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        coll.write_bytes("12.dat", stamp, b"a=1\n").unwrap();

        // An abandoned sink leaves nothing visible behind.
        {
            let mut sink = coll.open_write("13.dat", stamp).unwrap();
            sink.write_all(b"partial").unwrap();
        }

        assert_eq!(coll.list_names().unwrap(), vec!["12.dat".to_owned()]);
        assert_eq!(coll.last_modified("12.dat").unwrap(), Some(stamp));
        assert_eq!(
            coll.checksum("12.dat").unwrap(),
            Some(content_checksum(b"a=1\n"))
        );
    }

    #[test]
    fn read_only_view_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let mut coll = DirCollection::read_only(dir.path());
        assert!(matches!(
            coll.write_bytes("x", SystemTime::UNIX_EPOCH, b""),
            Err(StoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn store_round_trips_bundles_and_manifests() {
        let dir = TempDir::new().unwrap();
        let mut store = DirBundleStore::open(dir.path(), "desk").unwrap();
        let base = id("desk-100-data");
        store
            .insert_bundle(
                &base,
                vec![],
                &MemoryCollection::new().with_file("global.dat", "x=1\n"),
                Retention::Standard,
            )
            .unwrap();

        let source = MemoryCollection::new().with_file("global.dat", "x=2\n");
        let merged = store
            .store_bundle(BundleSpec {
                name: "data",
                source: &source,
                filenames: vec!["global.dat".to_owned()],
                parents: vec![base.clone()],
                retention: Retention::Permanent,
            })
            .unwrap();

        assert_eq!(store.list().unwrap(), vec![base.clone(), merged.clone()]);
        assert_eq!(store.parents(&merged).unwrap(), vec![base]);
        assert_eq!(
            store.manifest(&merged).unwrap().retention,
            Retention::Permanent
        );
        let content = store.collection(&merged).unwrap();
        assert_eq!(content.read_bytes("global.dat").unwrap().unwrap(), b"x=2\n");

        // Reopening sees the same state.
        let reopened = DirBundleStore::open(dir.path(), "other").unwrap();
        assert_eq!(reopened.list().unwrap().len(), 2);
    }

    #[test]
    fn failed_publish_leaves_no_bundle() {
        let dir = TempDir::new().unwrap();
        let mut store = DirBundleStore::open(dir.path(), "desk").unwrap();
        let err = store
            .store_bundle(BundleSpec {
                name: "data",
                source: &MemoryCollection::new(),
                filenames: vec!["ghost.dat".to_owned()],
                parents: vec![],
                retention: Retention::Standard,
            })
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list().unwrap().is_empty());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "staging dir should be cleaned up");
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = DirBundleStore::open(dir.path(), "desk").unwrap();
        let bundle = id("desk-1-data");
        let empty = MemoryCollection::new();
        store
            .insert_bundle(&bundle, vec![], &empty, Retention::Standard)
            .unwrap();
        assert!(
            store
                .insert_bundle(&bundle, vec![], &empty, Retention::Standard)
                .is_err()
        );
    }
}
