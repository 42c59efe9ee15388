//! Flat `key=value` data files (`1.dat`, `global.dat`, ...).

use crate::merge::{LatestWins, merge_maps};

use super::lines::{LineFile, render_values};

/// Merge three data files line by line. Conflicting keys take `second`'s
/// value; a key deleted on one side and untouched on the other is dropped.
#[must_use]
pub fn merge(parent: &[u8], first: &[u8], second: &[u8]) -> Vec<u8> {
    let outcome = merge_maps(
        &LineFile::parse(parent).values(),
        &LineFile::parse(first).values(),
        &LineFile::parse(second).values(),
        &mut LatestWins,
    );
    for key in &outcome.conflicts {
        tracing::debug!(%key, "data line conflict; taking second");
    }
    render_values(&outcome.merged)
}
