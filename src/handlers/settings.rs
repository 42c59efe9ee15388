//! `settings.ini`: latest-wins, except for reserved keys whose values are
//! collections and merge as such.

use crate::merge::{ConflictResolver, Preempt, merge_maps, merge_sets};

use super::lines::{LineFile, LineKey, render_values};
use super::requirements;

/// Which settings keys get collection semantics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsPolicy {
    /// Key holding version requirements; merged as a union of all three
    /// inputs whenever the forks disagree.
    pub requirements_key: String,
    /// Keys holding delimited path lists; merged element-wise.
    pub path_list_keys: Vec<String>,
    /// Separator for path-list values.
    pub path_list_delimiter: String,
}

impl Default for SettingsPolicy {
    fn default() -> Self {
        Self {
            requirements_key: "versionRequirements".to_owned(),
            path_list_keys: vec!["templatePath".to_owned(), "importPaths".to_owned()],
            path_list_delimiter: ";".to_owned(),
        }
    }
}

impl SettingsPolicy {
    /// Merge three settings files.
    #[must_use]
    pub fn merge(&self, parent: &[u8], first: &[u8], second: &[u8]) -> Vec<u8> {
        let outcome = merge_maps(
            &LineFile::parse(parent).values(),
            &LineFile::parse(first).values(),
            &LineFile::parse(second).values(),
            &mut SettingsResolver { policy: self },
        );
        render_values(&outcome.merged)
    }

    fn is_requirements(&self, key: &LineKey) -> bool {
        matches!(key, LineKey::Data(k) if k.as_slice() == self.requirements_key.as_bytes())
    }

    fn is_path_list(&self, key: &LineKey) -> bool {
        matches!(key, LineKey::Data(k) if self.path_list_keys.iter().any(|p| p.as_bytes() == k.as_slice()))
    }

    fn split_paths<'v>(&self, value: Option<&'v Vec<u8>>) -> Vec<&'v [u8]> {
        value.map_or_else(Vec::new, |v| {
            split_on(v, self.path_list_delimiter.as_bytes())
                .into_iter()
                .filter(|element| !element.is_empty())
                .collect()
        })
    }
}

/// `haystack` split at every occurrence of a non-empty `delimiter`.
fn split_on<'v>(haystack: &'v [u8], delimiter: &[u8]) -> Vec<&'v [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while !delimiter.is_empty() && i + delimiter.len() <= haystack.len() {
        if haystack[i..].starts_with(delimiter) {
            parts.push(&haystack[start..i]);
            i += delimiter.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&haystack[start..]);
    parts
}

struct SettingsResolver<'a> {
    policy: &'a SettingsPolicy,
}

impl ConflictResolver<LineKey, Vec<u8>> for SettingsResolver<'_> {
    fn preempt(
        &mut self,
        key: &LineKey,
        parent: Option<&Vec<u8>>,
        first: Option<&Vec<u8>>,
        second: Option<&Vec<u8>>,
    ) -> Preempt<Vec<u8>> {
        if first == second || !self.policy.is_requirements(key) {
            return Preempt::Proceed;
        }
        let texts: Result<Vec<&str>, _> = [parent, first, second]
            .into_iter()
            .flatten()
            .map(|v| std::str::from_utf8(v))
            .collect();
        match texts {
            Ok(texts) => {
                let merged = requirements::union(texts);
                tracing::debug!(%key, %merged, "merged version requirements");
                Preempt::Decide(Some(merged.into_bytes()))
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "version requirements are not UTF-8; taking second");
                Preempt::Proceed
            }
        }
    }

    fn resolve(
        &mut self,
        key: &LineKey,
        parent: Option<&Vec<u8>>,
        first: Option<&Vec<u8>>,
        second: Option<&Vec<u8>>,
    ) -> Option<Vec<u8>> {
        if !self.policy.is_path_list(key) {
            return second.cloned();
        }
        let merged = merge_sets(
            &self.policy.split_paths(parent),
            &self.policy.split_paths(first),
            &self.policy.split_paths(second),
        );
        if merged.is_empty() && (first.is_none() || second.is_none()) {
            return None;
        }
        Some(merged.join(self.policy.path_list_delimiter.as_bytes()))
    }
}
