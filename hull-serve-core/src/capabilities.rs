//! Capability lists as exchanged on the wire.

use bstr::{BStr, BString, ByteSlice};

/// A parsed capability list, e.g. the suffix of the first `want` line in the
/// stateful dialect.
///
/// Entries are either bare flags (`thin-pack`) or key/value pairs
/// (`agent=hull/0.1.0`).
#[derive(Clone, Default, Debug)]
pub struct CapabilitySet {
    entries: Vec<BString>,
}

impl CapabilitySet {
    /// Parse a space-separated capability list.
    pub fn from_line(line: &BStr) -> Self {
        Self {
            entries: line
                .split(|b: &u8| *b == b' ')
                .filter(|w| !w.is_empty())
                .map(|w| w.as_bstr().to_owned())
                .collect(),
        }
    }

    /// Return `true` if the bare capability `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e == name)
    }

    /// The value of a `name=value` entry, if present.
    pub fn value(&self, name: &str) -> Option<&BStr> {
        self.entries.iter().find_map(|e| {
            let rest = e.strip_prefix(name.as_bytes())?;
            rest.strip_prefix(b"=").map(|v| v.as_bstr())
        })
    }

    /// Add a bare capability.
    pub fn push(&mut self, name: impl Into<BString>) {
        self.entries.push(name.into());
    }

    /// Iterate over all raw entries.
    pub fn iter(&self) -> impl Iterator<Item = &BStr> {
        self.entries.iter().map(|e| e.as_bstr())
    }

    /// Whether no capabilities were sent.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
