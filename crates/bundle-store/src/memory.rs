//! In-memory collections and bundle store.
//!
//! Used by the engine's tests and by embedders that keep bundles in RAM.
//! Content is held behind [`Arc`] so opening a published bundle is a cheap
//! clone rather than a copy.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::bundle::{
    BundleId, BundleManifest, BundleSpec, ManifestEntry, Retention, creation_stamp,
    millis_since_epoch,
};
use crate::collection::{ResourceCollection, ResourceSink, content_checksum, validate_resource_name};
use crate::error::{Result, StoreError};
use crate::store::{BundleGraph, BundleStore};

// ---------------------------------------------------------------------------
// MemoryCollection
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Blob {
    bytes: Arc<[u8]>,
    checksum: u64,
    modified: SystemTime,
}

/// A [`ResourceCollection`] backed by a sorted map.
#[derive(Clone, Debug, Default)]
pub struct MemoryCollection {
    files: BTreeMap<String, Blob>,
    read_only: bool,
}

impl MemoryCollection {
    /// An empty, writable collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert with a Unix-epoch timestamp.
    ///
    /// # Panics
    /// Panics if `name` is not a valid resource name. Intended for fixtures.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_file(mut self, name: &str, bytes: impl AsRef<[u8]>) -> Self {
        self.insert(name, bytes.as_ref(), SystemTime::UNIX_EPOCH)
            .expect("fixture resource name must be valid");
        self
    }

    /// Insert or replace a resource.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidName`] or [`StoreError::ReadOnly`].
    pub fn insert(&mut self, name: &str, bytes: &[u8], modified: SystemTime) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly {
                name: name.to_owned(),
            });
        }
        validate_resource_name(name)?;
        self.files.insert(
            name.to_owned(),
            Blob {
                bytes: Arc::from(bytes),
                checksum: content_checksum(bytes),
                modified,
            },
        );
        Ok(())
    }

    /// Freeze the collection; later writes fail with [`StoreError::ReadOnly`].
    #[must_use]
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the collection holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ResourceCollection for MemoryCollection {
    fn list_names(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn checksum(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.files.get(name).map(|b| b.checksum))
    }

    fn last_modified(&self, name: &str) -> Result<Option<SystemTime>> {
        Ok(self.files.get(name).map(|b| b.modified))
    }

    fn open_read(&self, name: &str) -> Result<Option<Box<dyn Read + '_>>> {
        Ok(self
            .files
            .get(name)
            .map(|b| Box::new(&b.bytes[..]) as Box<dyn Read + '_>))
    }

    fn open_write(
        &mut self,
        name: &str,
        modified: SystemTime,
    ) -> Result<Box<dyn ResourceSink + '_>> {
        if self.read_only {
            return Err(StoreError::ReadOnly {
                name: name.to_owned(),
            });
        }
        validate_resource_name(name)?;
        Ok(Box::new(MemorySink {
            files: &mut self.files,
            name: name.to_owned(),
            modified,
            buf: Vec::new(),
        }))
    }
}

struct MemorySink<'a> {
    files: &'a mut BTreeMap<String, Blob>,
    name: String,
    modified: SystemTime,
    buf: Vec<u8>,
}

impl Write for MemorySink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ResourceSink for MemorySink<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            files,
            name,
            modified,
            buf,
        } = *self;
        let checksum = content_checksum(&buf);
        files.insert(
            name,
            Blob {
                bytes: Arc::from(buf),
                checksum,
                modified,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryBundleStore
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct StoredBundle {
    manifest: BundleManifest,
    content: MemoryCollection,
}

/// A [`BundleStore`] that keeps every bundle in memory.
#[derive(Clone, Debug)]
pub struct MemoryBundleStore {
    device: String,
    bundles: BTreeMap<BundleId, StoredBundle>,
}

impl MemoryBundleStore {
    /// A new store whose published bundles carry `device` in their IDs.
    #[must_use]
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_owned(),
            bundles: BTreeMap::new(),
        }
    }

    /// Seed a bundle with a caller-chosen identity (fixtures, imports).
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidBundleId`] if `id` is already present.
    pub fn insert_bundle(
        &mut self,
        id: BundleId,
        parents: Vec<BundleId>,
        content: &dyn ResourceCollection,
        retention: Retention,
    ) -> Result<()> {
        if self.bundles.contains_key(&id) {
            return Err(StoreError::InvalidBundleId {
                value: id.to_string(),
                reason: "bundle already exists".to_owned(),
            });
        }
        let names = content.list_names()?;
        let (snapshot, files) = snapshot_collection(content, &names)?;
        self.bundles.insert(
            id.clone(),
            StoredBundle {
                manifest: BundleManifest {
                    id,
                    parents,
                    retention,
                    files,
                },
                content: snapshot,
            },
        );
        Ok(())
    }

    fn get(&self, id: &BundleId) -> Result<&StoredBundle> {
        self.bundles
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("bundle `{id}`")))
    }
}

/// Copy `names` out of `source` into a frozen in-memory snapshot.
fn snapshot_collection(
    source: &dyn ResourceCollection,
    names: &[String],
) -> Result<(MemoryCollection, Vec<ManifestEntry>)> {
    let mut snapshot = MemoryCollection::new();
    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let bytes = source
            .read_bytes(name)?
            .ok_or_else(|| StoreError::not_found(format!("resource `{name}` in source")))?;
        let modified = source
            .last_modified(name)?
            .unwrap_or(SystemTime::UNIX_EPOCH);
        snapshot.insert(name, &bytes, modified)?;
        entries.push(ManifestEntry {
            name: name.clone(),
            checksum: content_checksum(&bytes),
            modified_ms: millis_since_epoch(modified),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((snapshot.into_read_only(), entries))
}

impl BundleGraph for MemoryBundleStore {
    fn parents(&self, id: &BundleId) -> Result<Vec<BundleId>> {
        Ok(self.get(id)?.manifest.parents.clone())
    }
}

impl BundleStore for MemoryBundleStore {
    fn collection(&self, id: &BundleId) -> Result<Box<dyn ResourceCollection>> {
        Ok(Box::new(self.get(id)?.content.clone()))
    }

    fn manifest(&self, id: &BundleId) -> Result<BundleManifest> {
        Ok(self.get(id)?.manifest.clone())
    }

    fn store_bundle(&mut self, spec: BundleSpec<'_>) -> Result<BundleId> {
        let mut created = creation_stamp(&spec.parents);
        let mut id = BundleId::new(&self.device, created, spec.name)?;
        while self.bundles.contains_key(&id) {
            created += 1;
            id = BundleId::new(&self.device, created, spec.name)?;
        }

        // Snapshot fully before touching the map: a failed read publishes nothing.
        let (content, files) = snapshot_collection(spec.source, &spec.filenames)?;
        self.bundles.insert(
            id.clone(),
            StoredBundle {
                manifest: BundleManifest {
                    id: id.clone(),
                    parents: spec.parents,
                    retention: spec.retention,
                    files,
                },
                content,
            },
        );
        tracing::debug!(bundle = %id, "stored bundle in memory");
        Ok(id)
    }

    fn list(&self) -> Result<Vec<BundleId>> {
        Ok(self.bundles.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BundleId {
        s.parse().unwrap()
    }

    #[test]
    fn sink_publishes_only_on_commit() {
        let mut coll = MemoryCollection::new();
        {
            let mut sink = coll.open_write("a.dat", SystemTime::UNIX_EPOCH).unwrap();
            sink.write_all(b"abandoned").unwrap();
        }
        assert!(!coll.contains("a.dat").unwrap());

        coll.write_bytes("a.dat", SystemTime::UNIX_EPOCH, b"kept")
            .unwrap();
        assert_eq!(coll.read_bytes("a.dat").unwrap().unwrap(), b"kept");
        assert_eq!(
            coll.checksum("a.dat").unwrap(),
            Some(content_checksum(b"kept"))
        );
    }

    #[test]
    fn read_only_collection_rejects_writes() {
        let mut coll = MemoryCollection::new().with_file("x", "1").into_read_only();
        assert!(matches!(
            coll.write_bytes("y", SystemTime::UNIX_EPOCH, b"2"),
            Err(StoreError::ReadOnly { .. })
        ));
    }

    #[test]
    fn store_bundle_records_parents_and_content() {
        let mut store = MemoryBundleStore::new("pc");
        let root = id("pc-10-data");
        store
            .insert_bundle(
                root.clone(),
                vec![],
                &MemoryCollection::new().with_file("1.dat", "a=1\n"),
                Retention::Standard,
            )
            .unwrap();

        let source = MemoryCollection::new()
            .with_file("1.dat", "a=2\n")
            .with_file("skip.dat", "not listed");
        let new_id = store
            .store_bundle(BundleSpec {
                name: "data",
                source: &source,
                filenames: vec!["1.dat".to_owned()],
                parents: vec![root.clone()],
                retention: Retention::Permanent,
            })
            .unwrap();

        assert_eq!(new_id.name(), "data");
        assert!(new_id.created() > root.created());
        assert_eq!(store.parents(&new_id).unwrap(), vec![root]);
        let manifest = store.manifest(&new_id).unwrap();
        assert_eq!(manifest.retention, Retention::Permanent);
        assert_eq!(manifest.files.len(), 1);

        let content = store.collection(&new_id).unwrap();
        assert_eq!(content.list_names().unwrap(), vec!["1.dat".to_owned()]);
        assert_eq!(content.read_bytes("1.dat").unwrap().unwrap(), b"a=2\n");
    }

    #[test]
    fn store_bundle_with_missing_file_publishes_nothing() {
        let mut store = MemoryBundleStore::new("pc");
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
    }

    #[test]
    fn unknown_bundle_is_not_found() {
        let store = MemoryBundleStore::new("pc");
        assert!(store.parents(&id("pc-1-data")).unwrap_err().is_not_found());
        assert!(store.collection(&id("pc-1-data")).is_err());
    }
}
