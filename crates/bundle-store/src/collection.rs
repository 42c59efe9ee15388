//! The [`ResourceCollection`] trait and helpers shared by every implementation.

use std::io::{Read, Write};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// A named set of byte blobs, each with a checksum and a modification time.
///
/// This is the only view of storage the merge engine has. Names are flat
/// (no directories) and validated by [`validate_resource_name`] before any
/// write.
///
/// # Invariants
///
/// - `list_names` is sorted and contains each name once.
/// - `checksum(name)` is `Some` exactly when `name` is listed.
/// - Two resources with equal checksums have equal content.
#[allow(clippy::missing_errors_doc)]
pub trait ResourceCollection {
    /// All resource names, sorted.
    fn list_names(&self) -> Result<Vec<String>>;

    /// Content checksum of `name`, or `None` if the resource is absent.
    fn checksum(&self, name: &str) -> Result<Option<u64>>;

    /// Last modification time of `name`, or `None` if the resource is absent.
    fn last_modified(&self, name: &str) -> Result<Option<SystemTime>>;

    /// Open `name` for reading, or `None` if the resource is absent.
    fn open_read(&self, name: &str) -> Result<Option<Box<dyn Read + '_>>>;

    /// Open `name` for writing. The new content replaces any existing
    /// resource only once the returned sink is committed.
    fn open_write(
        &mut self,
        name: &str,
        modified: SystemTime,
    ) -> Result<Box<dyn ResourceSink + '_>>;

    /// Returns `true` if `name` is present.
    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.checksum(name)?.is_some())
    }

    /// Read the full content of `name`.
    fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.open_read(name)? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Write `bytes` as the full content of `name` and commit.
    fn write_bytes(&mut self, name: &str, modified: SystemTime, bytes: &[u8]) -> Result<()> {
        let mut sink = self.open_write(name, modified)?;
        sink.write_all(bytes)?;
        sink.commit()
    }
}

impl std::fmt::Debug for dyn ResourceCollection + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ResourceCollection")
    }
}

/// A pending write. Dropping a sink without calling [`commit`](Self::commit)
/// discards everything written to it.
pub trait ResourceSink: Write {
    /// Publish the written bytes under the sink's name.
    ///
    /// # Errors
    /// Returns an error if the content cannot be persisted.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Checksum used by every collection: the first 8 bytes of SHA-256.
#[must_use]
pub fn content_checksum(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Reject names that cannot live in a flat collection.
///
/// # Errors
/// Returns [`StoreError::InvalidName`] for empty names, names with path
/// separators or NUL bytes, and hidden names (leading `.`, reserved for
/// in-flight temp files).
pub fn validate_resource_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if name.contains(['/', '\\']) {
        Some("name must not contain path separators")
    } else if name.contains('\0') {
        Some("name must not contain NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Copy `name` from `source` into `dest` verbatim, preserving its timestamp.
///
/// # Errors
/// Returns [`StoreError::NotFound`] if `source` has no such resource, or any
/// I/O error from either side.
pub fn copy_resource(
    source: &dyn ResourceCollection,
    dest: &mut dyn ResourceCollection,
    name: &str,
) -> Result<()> {
    let modified = source
        .last_modified(name)?
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut reader = source
        .open_read(name)?
        .ok_or_else(|| StoreError::not_found(format!("resource `{name}`")))?;
    let mut sink = dest.open_write(name, modified)?;
    std::io::copy(&mut reader, &mut sink)?;
    sink.commit()
}

/// A collection with nothing in it. Stands in for a missing ancestor.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyCollection;

impl ResourceCollection for EmptyCollection {
    fn list_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn checksum(&self, _name: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    fn last_modified(&self, _name: &str) -> Result<Option<SystemTime>> {
        Ok(None)
    }

    fn open_read(&self, _name: &str) -> Result<Option<Box<dyn Read + '_>>> {
        Ok(None)
    }

    fn open_write(
        &mut self,
        name: &str,
        _modified: SystemTime,
    ) -> Result<Box<dyn ResourceSink + '_>> {
        Err(StoreError::ReadOnly {
            name: name.to_owned(),
        })
    }
}
