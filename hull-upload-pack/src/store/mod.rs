//! Contracts to the surrounding toolkit: object database, reference store,
//! reachability bitmaps and the pack writer.
//!
//! The engine only ever talks to these traits; the real storage layers live
//! elsewhere. An in-memory implementation for tests and embedding ships in
//! [`memory`].

use crate::error::Result;
use crate::types::{Kind, Reference, SymbolicRef};
use bstr::BString;
use gix_hash::{oid, ObjectId};
use hull_serve_core::progress::ProgressSink;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::io::{Read, Write};

pub mod memory;

/// A parsed commit, as much of it as the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// The root tree of the commit.
    pub tree: ObjectId,
    /// Parent commits in order.
    pub parents: SmallVec<[ObjectId; 2]>,
    /// Committer timestamp in seconds since the epoch.
    pub committer_time: i64,
}

/// One entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// The entry name within its tree.
    pub name: BString,
    /// The object the entry points at.
    pub oid: ObjectId,
    /// The entry's object kind. `Commit` entries (submodule links) are not
    /// traversed.
    pub kind: Kind,
}

/// A parsed annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    /// The tagged object.
    pub target: ObjectId,
    /// The kind of the tagged object.
    pub target_kind: Kind,
    /// The tag's own name field.
    pub name: BString,
}

/// An opened object: its kind, size and a reader over its content.
///
/// The reader borrows from the store and is released when dropped, which the
/// session does on every exit path.
pub struct Object<'a> {
    /// The object's kind.
    pub kind: Kind,
    /// The uncompressed content size in bytes.
    pub size: u64,
    /// Streaming access to the content.
    pub reader: Box<dyn Read + 'a>,
}

/// Read access to the content-addressed object store.
pub trait ObjectDatabase {
    /// Whether `oid` exists in the store.
    fn contains(&self, oid: &oid) -> bool;

    /// The kind and uncompressed size of `oid` without opening its content.
    fn info(&self, oid: &oid) -> Result<(Kind, u64)>;

    /// Open `oid` for reading.
    fn open(&self, oid: &oid) -> Result<Object<'_>>;

    /// Parse `oid` as a commit.
    fn commit(&self, oid: &oid) -> Result<CommitInfo>;

    /// Parse `oid` as a tree.
    fn tree(&self, oid: &oid) -> Result<Vec<TreeEntry>>;

    /// Parse `oid` as an annotated tag.
    fn tag(&self, oid: &oid) -> Result<TagInfo>;
}

/// An immutable view of the reference namespace, taken at session start.
#[derive(Debug, Clone, Default)]
pub struct RefSnapshot {
    /// Direct references, sorted by name.
    pub refs: Vec<Reference>,
    /// Symbolic references, `HEAD` among them.
    pub symrefs: Vec<SymbolicRef>,
}

impl RefSnapshot {
    /// Find a direct reference by its fully qualified name.
    pub fn find(&self, name: &[u8]) -> Option<&Reference> {
        self.refs.iter().find(|r| r.name == name)
    }
}

/// Source of reference snapshots.
pub trait RefStore {
    /// Take a snapshot of all references.
    fn snapshot(&self) -> Result<RefSnapshot>;
}

/// Optional precomputed reachability index.
pub trait ReachabilityBitmaps {
    /// The set of objects reachable from `commit`, if that commit is indexed.
    fn bitmap(&self, commit: &oid) -> Option<HashSet<ObjectId>>;
}

/// Everything the pack writer needs to produce one packfile.
#[derive(Debug)]
pub struct PackRequest<'a> {
    /// The objects to pack, in enumeration order.
    pub objects: &'a [ObjectId],
    /// Objects the client is known to have; with `thin_pack` the writer may
    /// delta against them without including them.
    pub bases: &'a HashSet<ObjectId>,
    /// Whether the pack may reference bases outside itself.
    pub thin_pack: bool,
    /// Whether offset deltas are permitted.
    pub ofs_delta: bool,
}

/// Where a pack writer streams to: byte output plus a progress channel, both
/// ends of the same multiplexed transport.
pub trait PackOutput: Write + ProgressSink {}

impl<T: Write + ProgressSink + ?Sized> PackOutput for T {}

/// The external packfile encoder driven by the session.
pub trait PackWriter {
    /// Stream a pack for `request` into `out`, returning the number of pack
    /// bytes written.
    fn write_pack(
        &mut self,
        store: &dyn ObjectDatabase,
        request: &PackRequest<'_>,
        out: &mut dyn PackOutput,
    ) -> Result<u64>;
}

/// The per-session reference filter, invoked once before any policy decision.
pub trait RefFilterHook {
    /// Return the references the client may see.
    fn filter(&self, refs: Vec<Reference>) -> Vec<Reference>;
}

/// The default filter: every ref stays visible.
pub struct KeepAllRefs;

impl RefFilterHook for KeepAllRefs {
    fn filter(&self, refs: Vec<Reference>) -> Vec<Reference> {
        refs
    }
}
