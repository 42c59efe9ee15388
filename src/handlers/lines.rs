//! Line-oriented `key=value` files shared by the datafile, snapshot and
//! settings handlers.
//!
//! Everything here works on bytes. Files are not required to be UTF-8, and
//! lines are reproduced exactly as read.

use std::fmt;

use indexmap::IndexMap;

/// Map key for one logical entry of a line file.
///
/// The preamble is its own variant so it can never collide with a data key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LineKey {
    /// All non-data lines, as one opaque blob.
    Preamble,
    /// A `key=value` line.
    Data(Vec<u8>),
}

impl LineKey {
    /// A data key from text.
    #[must_use]
    pub fn data(key: &str) -> Self {
        Self::Data(key.as_bytes().to_vec())
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preamble => write!(f, "<preamble>"),
            Self::Data(key) => write!(f, "{}", String::from_utf8_lossy(key)),
        }
    }
}

/// One `key=value` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLine {
    /// Bytes after the first `=`, without a trailing `\r`.
    pub value: Vec<u8>,
    /// The line exactly as it appeared, minus the `\n`.
    pub raw: Vec<u8>,
}

/// A parsed line file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineFile {
    /// Comment, blank and header lines, verbatim and in order.
    pub preamble: Vec<Vec<u8>>,
    /// Data lines by key, in first-occurrence order.
    pub entries: IndexMap<Vec<u8>, DataLine>,
}

impl LineFile {
    /// Parse `bytes`. Never fails: anything that is not a data line is
    /// preamble.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        let mut file = Self::default();
        for raw in split_lines(bytes) {
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            match data_line(line) {
                Some((key, value)) => {
                    // `insert` keeps the first occurrence's slot.
                    file.entries.insert(
                        key.to_vec(),
                        DataLine {
                            value: value.to_vec(),
                            raw: raw.to_vec(),
                        },
                    );
                }
                None => file.preamble.push(raw.to_vec()),
            }
        }
        file
    }

    /// The preamble as one blob, or `None` if there is none.
    #[must_use]
    pub fn preamble_bytes(&self) -> Option<Vec<u8>> {
        (!self.preamble.is_empty()).then(|| self.preamble.join(&b'\n'))
    }

    /// Preamble and data values keyed by [`LineKey`], ready for
    /// [`merge_maps`](crate::merge::merge_maps).
    #[must_use]
    pub fn values(&self) -> IndexMap<LineKey, Vec<u8>> {
        let mut map = IndexMap::with_capacity(self.entries.len() + 1);
        if let Some(preamble) = self.preamble_bytes() {
            map.insert(LineKey::Preamble, preamble);
        }
        for (key, line) in &self.entries {
            map.insert(LineKey::Data(key.clone()), line.value.clone());
        }
        map
    }
}

/// Lines of `bytes` without their `\n`. A trailing `\n` does not start an
/// empty last line.
fn split_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let lines = (!bytes.is_empty()).then(|| body.split(|&b| b == b'\n'));
    lines.into_iter().flatten()
}

fn data_line(line: &[u8]) -> Option<(&[u8], &[u8])> {
    if line.starts_with(b"#") {
        return None;
    }
    let eq = line.iter().position(|&b| b == b'=')?;
    Some((&line[..eq], &line[eq + 1..]))
}

/// Render a merged `LineKey → value` map: preamble first, then `key=value`
/// lines in map order. Every line ends with `\n`.
#[must_use]
pub fn render_values(merged: &IndexMap<LineKey, Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(preamble) = merged.get(&LineKey::Preamble) {
        out.extend_from_slice(preamble);
        out.push(b'\n');
    }
    for (key, value) in merged {
        if let LineKey::Data(key) = key {
            out.extend_from_slice(key);
            out.push(b'=');
            out.extend_from_slice(value);
            out.push(b'\n');
        }
    }
    out
}
