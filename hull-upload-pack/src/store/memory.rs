//! In-memory implementations of the store contracts.
//!
//! These back the test-suite the same way the original keeps an in-memory
//! repository for protocol tests, and double as a reference for implementors
//! of the real storage layers. Object ids are synthetic: insertion order in
//! the low bytes of an otherwise zero hash.

use crate::error::{Error, Result};
use crate::store::{
    CommitInfo, Object, ObjectDatabase, PackOutput, PackRequest, PackWriter,
    ReachabilityBitmaps, RefSnapshot, RefStore, TagInfo, TreeEntry,
};
use crate::types::{Kind, Reference, SymbolicRef};
use bstr::BString;
use gix_hash::{oid, ObjectId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::Read;

enum MemObject {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(CommitInfo),
    Tag(TagInfo),
}

impl MemObject {
    fn kind(&self) -> Kind {
        match self {
            MemObject::Blob(_) => Kind::Blob,
            MemObject::Tree(_) => Kind::Tree,
            MemObject::Commit(_) => Kind::Commit,
            MemObject::Tag(_) => Kind::Tag,
        }
    }
}

/// A heap-backed object store with synthetic, deterministic object ids.
#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<ObjectId, MemObject>,
    serials: HashMap<ObjectId, Vec<u8>>,
    next_serial: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ObjectId {
        self.next_serial += 1;
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&self.next_serial.to_be_bytes());
        ObjectId::from(bytes)
    }

    fn insert(&mut self, object: MemObject, serialized: Vec<u8>) -> ObjectId {
        let id = self.next_id();
        self.objects.insert(id, object);
        self.serials.insert(id, serialized);
        id
    }

    /// Store a blob and return its id.
    pub fn blob(&mut self, data: impl Into<Vec<u8>>) -> ObjectId {
        let data = data.into();
        self.insert(MemObject::Blob(data.clone()), data)
    }

    /// Store a tree from `(name, oid)` pairs; entry kinds are looked up from
    /// previously stored objects.
    pub fn tree(&mut self, entries: &[(&str, ObjectId)]) -> ObjectId {
        let entries: Vec<TreeEntry> = entries
            .iter()
            .map(|(name, oid)| TreeEntry {
                name: BString::from(*name),
                oid: *oid,
                kind: self
                    .objects
                    .get(oid)
                    .map(MemObject::kind)
                    .unwrap_or(Kind::Blob),
            })
            .collect();
        let serialized = entries
            .iter()
            .flat_map(|e| {
                let mut line = e.name.to_vec();
                line.push(b' ');
                line.extend_from_slice(e.oid.to_string().as_bytes());
                line.push(b'\n');
                line
            })
            .collect();
        self.insert(MemObject::Tree(entries), serialized)
    }

    /// Store a commit with an empty tree.
    pub fn commit(&mut self, parents: &[ObjectId], committer_time: i64) -> ObjectId {
        let tree = self.tree(&[]);
        self.commit_with_tree(tree, parents, committer_time)
    }

    /// Store a commit pointing at `tree`.
    pub fn commit_with_tree(
        &mut self,
        tree: ObjectId,
        parents: &[ObjectId],
        committer_time: i64,
    ) -> ObjectId {
        let info = CommitInfo {
            tree,
            parents: SmallVec::from_slice(parents),
            committer_time,
        };
        let serialized = format!("tree {tree}\ntime {committer_time}\n").into_bytes();
        self.insert(MemObject::Commit(info), serialized)
    }

    /// Store an annotated tag pointing at `target`.
    pub fn tag(&mut self, name: &str, target: ObjectId) -> ObjectId {
        let target_kind = self
            .objects
            .get(&target)
            .map(MemObject::kind)
            .unwrap_or(Kind::Commit);
        let info = TagInfo {
            target,
            target_kind,
            name: BString::from(name),
        };
        let serialized = format!("object {target}\ntag {name}\n").into_bytes();
        self.insert(MemObject::Tag(info), serialized)
    }
}

impl ObjectDatabase for MemoryStore {
    fn contains(&self, oid: &oid) -> bool {
        self.objects.contains_key(&oid.to_owned())
    }

    fn info(&self, oid: &oid) -> Result<(Kind, u64)> {
        let object = self
            .objects
            .get(&oid.to_owned())
            .ok_or_else(|| Error::MissingObject(oid.to_owned()))?;
        let size = self
            .serials
            .get(&oid.to_owned())
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        Ok((object.kind(), size))
    }

    fn open(&self, oid: &oid) -> Result<Object<'_>> {
        let (kind, size) = self.info(oid)?;
        let data = self
            .serials
            .get(&oid.to_owned())
            .ok_or_else(|| Error::MissingObject(oid.to_owned()))?;
        Ok(Object {
            kind,
            size,
            reader: Box::new(data.as_slice()),
        })
    }

    fn commit(&self, oid: &oid) -> Result<CommitInfo> {
        match self
            .objects
            .get(&oid.to_owned())
            .ok_or_else(|| Error::MissingObject(oid.to_owned()))?
        {
            MemObject::Commit(info) => Ok(info.clone()),
            other => Err(Error::Resource(format!(
                "object {oid} is a {}, not a commit",
                other.kind()
            ))),
        }
    }

    fn tree(&self, oid: &oid) -> Result<Vec<TreeEntry>> {
        match self
            .objects
            .get(&oid.to_owned())
            .ok_or_else(|| Error::MissingObject(oid.to_owned()))?
        {
            MemObject::Tree(entries) => Ok(entries.clone()),
            other => Err(Error::Resource(format!(
                "object {oid} is a {}, not a tree",
                other.kind()
            ))),
        }
    }

    fn tag(&self, oid: &oid) -> Result<TagInfo> {
        match self
            .objects
            .get(&oid.to_owned())
            .ok_or_else(|| Error::MissingObject(oid.to_owned()))?
        {
            MemObject::Tag(info) => Ok(info.clone()),
            other => Err(Error::Resource(format!(
                "object {oid} is a {}, not a tag",
                other.kind()
            ))),
        }
    }
}

/// A mutable reference namespace for tests and embedding.
#[derive(Default)]
pub struct MemoryRefs {
    refs: BTreeMap<BString, ObjectId>,
    symrefs: Vec<SymbolicRef>,
}

impl MemoryRefs {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `name` at `target`. A name without a `refs/` prefix is placed
    /// under `refs/heads/`.
    pub fn update(&mut self, name: &str, target: ObjectId) {
        let full = if name.starts_with("refs/") || name == "HEAD" {
            name.to_string()
        } else {
            format!("refs/heads/{name}")
        };
        self.refs.insert(BString::from(full), target);
    }

    /// Remove `name` entirely.
    pub fn delete(&mut self, name: &str) {
        self.refs.remove(&BString::from(name));
    }

    /// Link a symbolic ref, e.g. `HEAD` to `refs/heads/main`.
    pub fn symref(&mut self, name: &str, target: &str) {
        self.symrefs.retain(|s| s.name != name);
        self.symrefs.push(SymbolicRef {
            name: BString::from(name),
            target: BString::from(target),
        });
    }
}

impl RefStore for MemoryRefs {
    fn snapshot(&self) -> Result<RefSnapshot> {
        Ok(RefSnapshot {
            refs: self
                .refs
                .iter()
                .map(|(name, target)| Reference {
                    name: name.clone(),
                    target: *target,
                    peeled: None,
                })
                .collect(),
            symrefs: self.symrefs.clone(),
        })
    }
}

/// A reachability index built by full closure walks, as a bitmap-capable
/// store would precompute them.
#[derive(Default)]
pub struct MemoryBitmaps {
    map: HashMap<ObjectId, HashSet<ObjectId>>,
}

impl MemoryBitmaps {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `tip` by walking its full object closure in `store`.
    pub fn index(&mut self, store: &dyn ObjectDatabase, tip: ObjectId) -> Result<()> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([tip]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) || !store.contains(&id) {
                continue;
            }
            let (kind, _) = store.info(&id)?;
            match kind {
                Kind::Commit => {
                    let info = store.commit(&id)?;
                    queue.push_back(info.tree);
                    queue.extend(info.parents.iter().copied());
                }
                Kind::Tree => {
                    for entry in store.tree(&id)? {
                        if entry.kind != Kind::Commit {
                            queue.push_back(entry.oid);
                        }
                    }
                }
                Kind::Tag => queue.push_back(store.tag(&id)?.target),
                Kind::Blob => {}
            }
        }
        seen.retain(|id| store.contains(id));
        self.map.insert(tip, seen);
        Ok(())
    }
}

impl ReachabilityBitmaps for MemoryBitmaps {
    fn bitmap(&self, commit: &oid) -> Option<HashSet<ObjectId>> {
        self.map.get(&commit.to_owned()).cloned()
    }
}

/// Magic bytes of the in-memory stream-pack format.
pub const STREAM_PACK_MAGIC: &[u8; 4] = b"HPCK";

/// A pack writer emitting a simple uncompressed object stream.
///
/// The format is `HPCK`, a big-endian `u32` object count, then per object the
/// 20 raw id bytes, one kind byte, a big-endian `u64` size and the content.
/// It stands in for the real delta-compressing encoder in tests; thin-pack
/// bases are honored by never emitting objects listed as bases.
#[derive(Default)]
pub struct StreamPackWriter;

fn kind_byte(kind: Kind) -> u8 {
    match kind {
        Kind::Commit => 1,
        Kind::Tree => 2,
        Kind::Blob => 3,
        Kind::Tag => 4,
    }
}

fn kind_from_byte(byte: u8) -> Option<Kind> {
    Some(match byte {
        1 => Kind::Commit,
        2 => Kind::Tree,
        3 => Kind::Blob,
        4 => Kind::Tag,
        _ => return None,
    })
}

impl PackWriter for StreamPackWriter {
    fn write_pack(
        &mut self,
        store: &dyn ObjectDatabase,
        request: &PackRequest<'_>,
        out: &mut dyn PackOutput,
    ) -> Result<u64> {
        out.info(&format!("Counting objects: {}", request.objects.len()));
        let mut written = 0u64;
        let mut put = |out: &mut dyn PackOutput, bytes: &[u8]| -> Result<()> {
            out.write_all(bytes)?;
            written += bytes.len() as u64;
            Ok(())
        };
        put(out, STREAM_PACK_MAGIC)?;
        put(out, &(request.objects.len() as u32).to_be_bytes())?;
        for id in request.objects {
            let mut object = store.open(id)?;
            let mut content = Vec::with_capacity(object.size as usize);
            object
                .reader
                .read_to_end(&mut content)
                .map_err(|e| Error::Resource(e.to_string()))?;
            put(out, id.as_bytes())?;
            put(out, &[kind_byte(object.kind)])?;
            put(out, &(content.len() as u64).to_be_bytes())?;
            put(out, &content)?;
        }
        out.flush()?;
        out.info(&format!("Writing objects: {}, done.", request.objects.len()));
        Ok(written)
    }
}

/// Decode a [`StreamPackWriter`] stream back into `(id, kind, content)`
/// triples, for assertions in tests.
pub fn parse_stream_pack(bytes: &[u8]) -> Result<Vec<(ObjectId, Kind, Vec<u8>)>> {
    let bad = |why: &str| Error::PackWrite(format!("malformed stream pack: {why}"));
    if bytes.len() < 8 || &bytes[..4] != STREAM_PACK_MAGIC {
        return Err(bad("missing magic"));
    }
    let count = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let mut at = 8;
    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < at + 29 {
            return Err(bad("truncated header"));
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&bytes[at..at + 20]);
        let kind = kind_from_byte(bytes[at + 20]).ok_or_else(|| bad("bad kind byte"))?;
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[at + 21..at + 29]);
        let size = u64::from_be_bytes(size) as usize;
        at += 29;
        if bytes.len() < at + size {
            return Err(bad("truncated content"));
        }
        objects.push((ObjectId::from(id), kind, bytes[at..at + size].to_vec()));
        at += size;
    }
    Ok(objects)
}

/// A pack writer that records what it was asked to pack and writes nothing.
#[derive(Default)]
pub struct RecordingPackWriter {
    /// Objects from the most recent request.
    pub objects: Vec<ObjectId>,
    /// Bases from the most recent request.
    pub bases: HashSet<ObjectId>,
    /// Thin-pack flag from the most recent request.
    pub thin_pack: bool,
}

impl PackWriter for RecordingPackWriter {
    fn write_pack(
        &mut self,
        _store: &dyn ObjectDatabase,
        request: &PackRequest<'_>,
        _out: &mut dyn PackOutput,
    ) -> Result<u64> {
        self.objects = request.objects.to_vec();
        self.bases = request.bases.clone();
        self.thin_pack = request.thin_pack;
        Ok(0)
    }
}
