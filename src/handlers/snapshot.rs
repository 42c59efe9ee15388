//! Snapshot files: data lines that must be reproduced byte-for-byte from
//! whichever input supplied them.

use indexmap::IndexMap;

use crate::merge::{LatestWins, Side, merge_maps};

use super::lines::{LineFile, LineKey};

/// A value plus where it came from. Equality ignores the origin so that the
/// same value on two sides counts as agreement.
#[derive(Clone, Debug)]
struct Attributed {
    side: Side,
    value: Vec<u8>,
    raw: Vec<u8>,
}

impl PartialEq for Attributed {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

fn attributed(file: &LineFile, side: Side) -> IndexMap<LineKey, Attributed> {
    let mut map = IndexMap::with_capacity(file.entries.len() + 1);
    if let Some(preamble) = file.preamble_bytes() {
        map.insert(
            LineKey::Preamble,
            Attributed {
                side,
                value: preamble.clone(),
                raw: preamble,
            },
        );
    }
    for (key, line) in &file.entries {
        map.insert(
            LineKey::Data(key.clone()),
            Attributed {
                side,
                value: line.value.clone(),
                raw: line.raw.clone(),
            },
        );
    }
    map
}

/// Merge three snapshot files.
///
/// Output is the merged preamble, then the surviving lines grouped by the
/// side that supplied them (parent, first, second), each group in that
/// side's own file order.
#[must_use]
pub fn merge(parent: &[u8], first: &[u8], second: &[u8]) -> Vec<u8> {
    let files = [
        LineFile::parse(parent),
        LineFile::parse(first),
        LineFile::parse(second),
    ];
    let [p, f, s] = [
        attributed(&files[0], Side::Parent),
        attributed(&files[1], Side::First),
        attributed(&files[2], Side::Second),
    ];
    let merged = merge_maps(&p, &f, &s, &mut LatestWins).merged;

    let mut out = Vec::new();
    if let Some(preamble) = merged.get(&LineKey::Preamble) {
        out.extend_from_slice(&preamble.raw);
        out.push(b'\n');
    }
    for (side, file) in Side::ALL.into_iter().zip(&files) {
        for key in file.entries.keys() {
            // Lookup by key alone; the winning entry says which side owns it.
            let Some(entry) = merged.get(&LineKey::Data(key.clone())) else {
                continue;
            };
            if entry.side == side {
                out.extend_from_slice(&entry.raw);
                out.push(b'\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_grouped_by_contributing_side() {
        let parent = b"P=0\nA=1\nB=1\n";
        let first = b"P=0\nA=2\nB=1\nF=1\n";
        let second = b"P=0\nA=1\nB=9\nS=1\n";
        // P agrees everywhere; equality keeps first's copy.
        assert_eq!(merge(parent, first, second), b"P=0\nA=2\nF=1\nB=9\nS=1\n");
    }

    #[test]
    fn raw_text_is_preserved() {
        let out = merge(b"", b"A=1\r\n", b"B= spaced \n");
        assert_eq!(out, b"A=1\r\nB= spaced \n");
    }

    #[test]
    fn latin1_lines_are_copied_byte_for_byte() {
        let out = merge(b"A=1\nB=1\n", b"A=caf\xe9\nB=1\n", b"A=1\nB=2\n");
        assert_eq!(out, b"A=caf\xe9\nB=2\n");
    }

    #[test]
    fn conflict_takes_second_line() {
        assert_eq!(
            merge(b"# h\nA=1\n", b"# h\nA=2\n", b"# h\nA=3\n"),
            b"# h\nA=3\n"
        );
    }
}
