//! Common types shared across the upload-pack engine.

use bstr::BString;
use gix_hash::ObjectId;

/// The kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A commit, carrying parents, a root tree and a committer timestamp.
    Commit,
    /// A tree, enumerating named entries.
    Tree,
    /// A blob of file content.
    Blob,
    /// An annotated tag pointing at any object.
    Tag,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Kind::Commit => "commit",
            Kind::Tree => "tree",
            Kind::Blob => "blob",
            Kind::Tag => "tag",
        })
    }
}

/// A named pointer to an object, as seen in a reference snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The fully qualified name, e.g. `refs/heads/main`.
    pub name: BString,
    /// The object the reference points at.
    pub target: ObjectId,
    /// For annotated tags, the object at the end of the tag chain.
    pub peeled: Option<ObjectId>,
}

impl Reference {
    /// Create a direct reference without peel information.
    pub fn new(name: impl Into<BString>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
            peeled: None,
        }
    }
}

/// A symbolic reference, e.g. `HEAD -> refs/heads/main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicRef {
    /// The symbolic name.
    pub name: BString,
    /// The name of the reference it links to.
    pub target: BString,
}

/// Acknowledgment modes negotiable in the stateful dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiAckMode {
    /// A single `ACK` at the end of negotiation.
    #[default]
    None,
    /// `ACK <oid> continue` for every common object.
    MultiAck,
    /// `ACK <oid> common`/`ready` with per-object detail.
    MultiAckDetailed,
}

/// Side-band framing negotiated for the pack phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideBandMode {
    /// Raw pack bytes, no multiplexing.
    #[default]
    None,
    /// `side-band`: frames of up to 1000 bytes.
    Basic,
    /// `side-band-64k`: frames of up to 65520 bytes.
    Wide,
}

impl SideBandMode {
    /// Whether any side-band framing is active.
    pub fn is_active(&self) -> bool {
        !matches!(self, SideBandMode::None)
    }

    /// Whether the wide 64k frames were negotiated.
    pub fn is_wide(&self) -> bool {
        matches!(self, SideBandMode::Wide)
    }
}

/// Observations recorded while serving one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    /// Number of objects handed to the pack writer.
    pub objects: usize,
    /// Number of tree traversals performed during enumeration, deduplicated
    /// per traversal context.
    pub trees_traversed: usize,
    /// Bytes of pack data written to the transport.
    pub pack_bytes: u64,
}
