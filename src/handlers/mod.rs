//! Format-aware content merges, selected by filename.
//!
//! Each handler reads the same file from the three inputs, merges the
//! content, and writes exactly one file to the destination. Which handler
//! applies is decided by an ordered rule table (first match wins) so that
//! configuration can put more specific rules ahead of the defaults.

pub mod datafile;
pub mod hierarchy;
pub mod lines;
pub mod requirements;
pub mod settings;
pub mod snapshot;

use std::fmt;
use std::time::SystemTime;

use bundle_store::{ResourceCollection, StoreError};
use serde::{Deserialize, Serialize};

use crate::merge::{MergeSources, Side};

pub use settings::SettingsPolicy;

// ---------------------------------------------------------------------------
// ContentHandler
// ---------------------------------------------------------------------------

/// The content merge strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentHandler {
    /// Flat `key=value` data, latest-wins per line.
    Datafile,
    /// `key=value` lines reproduced verbatim from their source.
    Snapshot,
    /// Settings with union semantics for reserved keys.
    Settings,
    /// XML node tree; additions from both forks are kept.
    Hierarchy,
}

impl fmt::Display for ContentHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datafile => write!(f, "datafile"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Settings => write!(f, "settings"),
            Self::Hierarchy => write!(f, "hierarchy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A filename predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum NameRule {
    /// The whole name.
    Exact(String),
    /// A leading substring.
    Prefix(String),
    /// `<digit>...dat`, i.e. numbered data files.
    NumberedData,
    /// A glob pattern, e.g. `*.cfg`.
    Glob(glob::Pattern),
}

impl NameRule {
    /// Returns `true` if `name` satisfies the rule.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::NumberedData => {
                name.ends_with(".dat") && name.starts_with(|c: char| c.is_ascii_digit())
            }
            Self::Glob(pattern) => pattern.matches(name),
        }
    }
}

/// One row of the dispatch table.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerRule {
    /// When the rule applies.
    pub rule: NameRule,
    /// What it selects.
    pub handler: ContentHandler,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure while merging one file's content.
#[derive(Debug)]
pub enum HandlerError {
    /// Reading an input or writing the result failed.
    Store(StoreError),
    /// The merged hierarchy could not be serialized.
    Xml(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Xml(msg) => write!(f, "failed to write hierarchy XML: {msg}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Xml(_) => None,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Filename → handler dispatch plus the per-handler settings.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerRegistry {
    rules: Vec<HandlerRule>,
    settings: SettingsPolicy,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl HandlerRegistry {
    /// The built-in table:
    ///
    /// 1. `hierarchy.xml` → hierarchy
    /// 2. `settings.ini` → settings
    /// 3. `snapshot-*` → snapshot
    /// 4. numbered `*.dat` and `global.dat` → datafile
    #[must_use]
    pub fn standard() -> Self {
        let rule = |rule, handler| HandlerRule { rule, handler };
        Self {
            rules: vec![
                rule(NameRule::Exact("hierarchy.xml".to_owned()), ContentHandler::Hierarchy),
                rule(NameRule::Exact("settings.ini".to_owned()), ContentHandler::Settings),
                rule(NameRule::Prefix("snapshot-".to_owned()), ContentHandler::Snapshot),
                rule(NameRule::NumberedData, ContentHandler::Datafile),
                rule(NameRule::Exact("global.dat".to_owned()), ContentHandler::Datafile),
            ],
            settings: SettingsPolicy::default(),
        }
    }

    /// Put `rules` ahead of the existing ones, keeping their order.
    #[must_use]
    pub fn with_leading_rules(mut self, rules: impl IntoIterator<Item = HandlerRule>) -> Self {
        let mut combined: Vec<HandlerRule> = rules.into_iter().collect();
        combined.append(&mut self.rules);
        self.rules = combined;
        self
    }

    /// Replace the settings policy.
    #[must_use]
    pub fn with_settings(mut self, settings: SettingsPolicy) -> Self {
        self.settings = settings;
        self
    }

    /// The dispatch table, in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[HandlerRule] {
        &self.rules
    }

    /// The handler for `name`, if any rule matches.
    #[must_use]
    pub fn select(&self, name: &str) -> Option<ContentHandler> {
        self.rules
            .iter()
            .find(|r| r.rule.matches(name))
            .map(|r| r.handler)
    }

    /// Merge `name` from `sources` with `handler` and write it to `dest`.
    ///
    /// Missing inputs count as empty. Identical forks are written through
    /// unchanged. The result carries the later of the two forks' timestamps.
    ///
    /// # Errors
    /// Returns [`HandlerError`] if an input cannot be read or the result
    /// cannot be written.
    pub fn merge_file(
        &self,
        handler: ContentHandler,
        name: &str,
        sources: &MergeSources<'_>,
        dest: &mut dyn ResourceCollection,
    ) -> Result<(), HandlerError> {
        let read = |side: Side| -> Result<Vec<u8>, HandlerError> {
            Ok(sources.get(side).read_bytes(name)?.unwrap_or_default())
        };
        let (parent, first, second) = (read(Side::Parent)?, read(Side::First)?, read(Side::Second)?);

        let merged = if first == second {
            first
        } else {
            let (p, f, s) = (parent.as_slice(), first.as_slice(), second.as_slice());
            match handler {
                ContentHandler::Datafile => datafile::merge(p, f, s),
                ContentHandler::Snapshot => snapshot::merge(p, f, s),
                ContentHandler::Settings => self.settings.merge(p, f, s),
                ContentHandler::Hierarchy => hierarchy::merge(p, f, s)?.into_bytes(),
            }
        };

        let modified = merged_timestamp(sources, name)?;
        dest.write_bytes(name, modified, &merged)?;
        tracing::debug!(file = name, %handler, bytes = merged.len(), "wrote merged content");
        Ok(())
    }
}

/// The later of the two forks' modification times. Taken from the inputs
/// rather than the clock so repeated merges produce identical bundles.
///
/// # Errors
/// Returns [`StoreError`] if a timestamp cannot be read.
pub fn merged_timestamp(sources: &MergeSources<'_>, name: &str) -> Result<SystemTime, StoreError> {
    let first = sources.first.last_modified(name)?;
    let second = sources.second.last_modified(name)?;
    Ok(first.max(second).unwrap_or(SystemTime::UNIX_EPOCH))
}
