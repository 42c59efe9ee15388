//! Bundle identifiers, manifests, and publication specs.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::collection::ResourceCollection;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// BundleId
// ---------------------------------------------------------------------------

/// Identity of one immutable bundle snapshot.
///
/// String form: `<device>-<created-millis>-<name>`, e.g.
/// `laptop-1718000000000-pdash-data`. The device is lowercase alphanumeric
/// (no hyphen), the timestamp is decimal milliseconds since the Unix epoch,
/// and the name is everything after the second hyphen.
///
/// Ordering is `(created, device, name)`, i.e. earliest-created first. The
/// merge coordinator relies on this to pick a stable processing order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleId {
    created: u64,
    device: String,
    name: String,
}

impl BundleId {
    /// Build an identifier from its parts.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidBundleId`] if the device or name is invalid.
    pub fn new(device: &str, created: u64, name: &str) -> Result<Self, StoreError> {
        let id = Self {
            created,
            device: device.to_owned(),
            name: name.to_owned(),
        };
        id.validate()?;
        Ok(id)
    }

    /// The device that created this bundle.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn created(&self) -> u64 {
        self.created
    }

    /// The logical bundle name shared by all forks of one dataset.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| StoreError::InvalidBundleId {
            value: self.to_string(),
            reason: reason.to_owned(),
        };
        if self.device.is_empty() {
            return Err(invalid("device must not be empty"));
        }
        if !self
            .device
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(invalid(
                "device must contain only lowercase letters (a-z) and digits (0-9)",
            ));
        }
        if self.name.is_empty() {
            return Err(invalid("bundle name must not be empty"));
        }
        if self.name.contains(['/', '\\']) || self.name.starts_with('.') {
            return Err(invalid(
                "bundle name must not contain path separators or start with '.'",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.device, self.created, self.name)
    }
}

impl FromStr for BundleId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StoreError::InvalidBundleId {
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        let mut parts = s.splitn(3, '-');
        let (Some(device), Some(created), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected <device>-<created>-<name>"));
        };
        let created = created
            .parse::<u64>()
            .map_err(|_| invalid("creation time must be decimal milliseconds"))?;
        Self::new(device, created, name)
    }
}

impl TryFrom<String> for BundleId {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BundleId> for String {
    fn from(id: BundleId) -> Self {
        id.to_string()
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

/// Milliseconds since the Unix epoch, saturating; pre-epoch times map to 0.
#[must_use]
pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Creation stamp for a new bundle: now, but never earlier than one
/// millisecond after its newest parent.
#[must_use]
pub fn creation_stamp(parents: &[BundleId]) -> u64 {
    let after_parents = parents
        .iter()
        .map(|p| p.created.saturating_add(1))
        .max()
        .unwrap_or(0);
    now_millis().max(after_parents)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// How long a published bundle must be kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    /// Eligible for garbage collection once superseded.
    #[default]
    Standard,
    /// Never collected. Merge snapshots are the reconciliation point of record.
    Permanent,
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Persistent description of a published bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// The bundle's identity.
    pub id: BundleId,
    /// Parent bundles. More than one parent marks a merge snapshot.
    pub parents: Vec<BundleId>,
    /// Garbage-collection policy.
    pub retention: Retention,
    /// The files in the bundle, sorted by name.
    pub files: Vec<ManifestEntry>,
}

impl BundleManifest {
    /// Returns `true` if this bundle was produced by merging several forks.
    #[must_use]
    pub fn is_merge_snapshot(&self) -> bool {
        self.parents.len() > 1
    }
}

/// One file recorded in a [`BundleManifest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Resource name.
    pub name: String,
    /// Content checksum at publication time.
    pub checksum: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified_ms: u64,
}

// ---------------------------------------------------------------------------
// BundleSpec
// ---------------------------------------------------------------------------

/// Everything a [`BundleStore`](crate::BundleStore) needs to publish a bundle.
pub struct BundleSpec<'a> {
    /// Logical bundle name (becomes [`BundleId::name`]).
    pub name: &'a str,
    /// Where the content comes from.
    pub source: &'a dyn ResourceCollection,
    /// Which resources of `source` to include.
    pub filenames: Vec<String>,
    /// Parent bundles, in the order the caller supplied them.
    pub parents: Vec<BundleId>,
    /// Garbage-collection policy for the new bundle.
    pub retention: Retention,
}

impl fmt::Debug for BundleSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSpec")
            .field("name", &self.name)
            .field("filenames", &self.filenames)
            .field("parents", &self.parents)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BundleId {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_displays_round_trip() {
        let parsed = id("laptop-1718000000000-pdash-data");
        assert_eq!(parsed.device(), "laptop");
        assert_eq!(parsed.created(), 1_718_000_000_000);
        assert_eq!(parsed.name(), "pdash-data");
        assert_eq!(parsed.to_string(), "laptop-1718000000000-pdash-data");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "laptop",
            "laptop-12",
            "Laptop-12-data",
            "laptop-abc-data",
            "laptop-12-",
            "-12-data",
            "laptop-12-../x",
        ] {
            assert!(bad.parse::<BundleId>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn orders_earliest_created_first() {
        let mut ids = vec![
            id("b-300-data"),
            id("a-300-data"),
            id("z-100-data"),
            id("c-200-data"),
        ];
        ids.sort();
        let order: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(order, ["z-100-data", "c-200-data", "a-300-data", "b-300-data"]);
    }

    #[test]
    fn serde_uses_string_form() {
        let json = serde_json::to_string(&id("pc1-5-data")).unwrap();
        assert_eq!(json, "\"pc1-5-data\"");
        let back: BundleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id("pc1-5-data"));
        assert!(serde_json::from_str::<BundleId>("\"PC-5-data\"").is_err());
    }

    #[test]
    fn creation_stamp_follows_parents() {
        let far_future = u64::MAX / 2;
        let parents = vec![id(&format!("a-{far_future}-data")), id("b-1-data")];
        assert_eq!(creation_stamp(&parents), far_future + 1);
        assert!(creation_stamp(&[]) > 0);
    }
}
