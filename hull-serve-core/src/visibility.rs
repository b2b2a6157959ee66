//! Reference visibility: deciding which refs a client may see.

use bstr::{BStr, BString, ByteSlice};

/// A set of hide patterns applied to fully qualified reference names.
///
/// A pattern ending in `*` hides every ref with that prefix; any other
/// pattern hides the exactly matching name.
#[derive(Clone, Default, Debug)]
pub struct HiddenRefs {
    patterns: Vec<BString>,
}

impl HiddenRefs {
    /// Create an empty set that hides nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a set from the given patterns.
    pub fn from_patterns<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<BString>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Add one pattern.
    pub fn push(&mut self, pattern: impl Into<BString>) {
        self.patterns.push(pattern.into());
    }

    /// Return `true` if `name` must not be advertised.
    pub fn is_hidden(&self, name: &BStr) -> bool {
        self.patterns.iter().any(|p| match p.strip_suffix(b"*") {
            Some(prefix) => name.starts_with(prefix),
            None => name == p.as_bstr(),
        })
    }
}
