//! Object-graph filter specs for partial fetches.

use crate::error::{Error, Result};
use bstr::{BStr, BString, ByteSlice};

/// A parsed `filter` argument.
///
/// Kept as a sum type so conflicting or malformed specs are caught at parse
/// time and the planner can match on exactly one shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterSpec {
    /// No filtering; the full closure is sent.
    #[default]
    None,
    /// `blob:none`: omit every blob not explicitly wanted.
    BlobNone,
    /// `blob:limit=<n>`: omit blobs larger than `n` bytes.
    BlobLimit(u64),
    /// `tree:<depth>`: do not traverse trees below the given depth, the root
    /// tree being depth 1.
    TreeDepth(u64),
}

impl FilterSpec {
    /// Parse the argument of a `filter` line.
    pub fn parse(spec: &BStr) -> Result<Self> {
        let text = spec.to_str().map_err(|_| invalid(spec))?.trim();
        if text == "blob:none" {
            return Ok(Self::BlobNone);
        }
        if let Some(limit) = text.strip_prefix("blob:limit=") {
            return parse_scaled(limit)
                .map(Self::BlobLimit)
                .ok_or_else(|| invalid(spec));
        }
        if let Some(depth) = text.strip_prefix("tree:") {
            return depth
                .parse::<u64>()
                .map(Self::TreeDepth)
                .map_err(|_| invalid(spec));
        }
        Err(invalid(spec))
    }

    /// Whether no filter is in effect.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether a blob of `size` bytes passes the filter.
    pub fn admits_blob(&self, size: u64) -> bool {
        match self {
            Self::None => true,
            Self::BlobNone => false,
            Self::BlobLimit(limit) => size <= *limit,
            Self::TreeDepth(_) => true,
        }
    }

    /// The tree-depth limit, if this is a tree filter.
    pub fn tree_depth_limit(&self) -> Option<u64> {
        match self {
            Self::TreeDepth(depth) => Some(*depth),
            _ => None,
        }
    }
}

fn invalid(spec: &BStr) -> Error {
    Error::InvalidFilter(BString::from(spec))
}

/// Parse a byte count with an optional `k`/`m`/`g` suffix.
fn parse_scaled(text: &str) -> Option<u64> {
    let (digits, scale) = match text.as_bytes().last()? {
        b'k' => (&text[..text.len() - 1], 1024),
        b'm' => (&text[..text.len() - 1], 1024 * 1024),
        b'g' => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        _ => (text, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::ByteSlice;

    #[test]
    fn parses_known_shapes() {
        assert_eq!(
            FilterSpec::parse(b"blob:none".as_bstr()).unwrap(),
            FilterSpec::BlobNone
        );
        assert_eq!(
            FilterSpec::parse(b"blob:limit=5".as_bstr()).unwrap(),
            FilterSpec::BlobLimit(5)
        );
        assert_eq!(
            FilterSpec::parse(b"blob:limit=2k".as_bstr()).unwrap(),
            FilterSpec::BlobLimit(2048)
        );
        assert_eq!(
            FilterSpec::parse(b"tree:3".as_bstr()).unwrap(),
            FilterSpec::TreeDepth(3)
        );
    }

    #[test]
    fn rejects_unknown_shapes() {
        for bad in ["sparse:oid=abc", "blob:limit=", "tree:-1", "object:none"] {
            let err = FilterSpec::parse(bad.as_bytes().as_bstr()).unwrap_err();
            assert!(
                err.to_string().starts_with("invalid filter-spec"),
                "unexpected error for {bad}: {err}"
            );
        }
    }

    #[test]
    fn blob_admission() {
        assert!(FilterSpec::None.admits_blob(u64::MAX));
        assert!(!FilterSpec::BlobNone.admits_blob(0));
        assert!(FilterSpec::BlobLimit(5).admits_blob(5));
        assert!(!FilterSpec::BlobLimit(5).admits_blob(6));
        assert!(FilterSpec::TreeDepth(1).admits_blob(u64::MAX));
    }
}
