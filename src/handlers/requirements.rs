//! Version-requirement lists such as `core@1.2, charts@0.9 maps`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Union of every requirement named in `values`.
///
/// Entries are separated by commas or whitespace and are either `package` or
/// `package@version`. Each package appears once in the output with the
/// highest version any input asked for. Output is sorted by package name and
/// joined with `", "`.
#[must_use]
pub fn union<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let mut wanted: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for value in values {
        for entry in value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|e| !e.is_empty())
        {
            let (package, version) = match entry.split_once('@') {
                Some((package, version)) => (package, Some(version)),
                None => (entry, None),
            };
            let slot = wanted.entry(package).or_insert(None);
            if compare_requirement(version, *slot) == Ordering::Greater {
                *slot = version;
            }
        }
    }
    wanted
        .into_iter()
        .map(|(package, version)| match version {
            Some(version) => format!("{package}@{version}"),
            None => package.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Any pinned version outranks an unpinned requirement.
fn compare_requirement(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_versions(a, b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Dot-separated comparison; numeric segments numerically, others lexically.
/// With an equal prefix the longer version is higher (`1.2.1 > 1.2`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
