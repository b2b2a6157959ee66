//! The parsed, validated request model.
//!
//! Requests are immutable once a dialect driver finishes parsing; every field
//! is a plain value or a sum type so conflicting options surface as parse
//! errors rather than as late surprises.

use crate::config::ServerOptions;
use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::types::{MultiAckMode, Reference, SideBandMode};
use bstr::{BStr, BString, ByteSlice};
use gix_hash::ObjectId;
use smallvec::SmallVec;
use std::collections::HashSet;

/// How the client asked to deepen its history, if at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Deepen {
    /// Not a shallow request.
    #[default]
    None,
    /// `deepen <n>`: keep `n` generations below each want.
    Depth(u32),
    /// `deepen-since <epoch>`: keep commits at or after the given time.
    Since(i64),
    /// `deepen-not <ref|oid>`: exclude the ancestry of the named points.
    Not(Vec<BString>),
}

impl Deepen {
    /// Whether any deepening was requested.
    pub fn is_none(&self) -> bool {
        matches!(self, Deepen::None)
    }
}

/// The request observed during the capability phase of the command dialect.
#[derive(Debug, Clone, Default)]
pub struct CapabilitiesRequest {
    /// The client's agent string, if it already introduced itself.
    pub agent: Option<BString>,
}

/// A parsed `ls-refs` command.
#[derive(Debug, Clone, Default)]
pub struct LsRefsRequest {
    /// Whether symref targets should be reported.
    pub symrefs: bool,
    /// Whether annotated tags should be reported with their peeled target.
    pub peel: bool,
    /// Name prefixes to restrict the listing to; empty means everything.
    pub ref_prefixes: SmallVec<[BString; 2]>,
    /// Opaque options forwarded to hooks.
    pub server_options: Vec<BString>,
    /// The client's agent string.
    pub agent: Option<BString>,
}

impl LsRefsRequest {
    /// Whether `name` passes the prefix restriction.
    pub fn matches(&self, name: &BStr) -> bool {
        self.ref_prefixes.is_empty()
            || self.ref_prefixes.iter().any(|p| name.starts_with(p))
    }
}

/// A parsed `fetch` command (or the stateful equivalent).
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Objects explicitly requested, in request order, deduplicated.
    pub wants: Vec<ObjectId>,
    /// `want-ref` names resolved against the advertised refs, in request
    /// order; their targets are wants as well.
    pub want_refs: Vec<Reference>,
    /// Objects the client claims to possess, in request order.
    pub haves: Vec<ObjectId>,
    /// The client's declared shallow boundary, in request order.
    pub client_shallow: Vec<ObjectId>,
    /// The deepen clause.
    pub deepen: Deepen,
    /// The filter clause.
    pub filter: FilterSpec,
    /// `thin-pack` was requested.
    pub thin_pack: bool,
    /// `no-progress` was requested.
    pub no_progress: bool,
    /// `include-tag` was requested.
    pub include_tag: bool,
    /// `ofs-delta` was requested.
    pub ofs_delta: bool,
    /// Side-band mode negotiated for the pack phase.
    pub side_band: SideBandMode,
    /// Acknowledgment mode negotiated in the stateful dialect.
    pub multi_ack: MultiAckMode,
    /// The client ended negotiation with `done`.
    pub done: bool,
    /// Opaque options forwarded to hooks.
    pub server_options: Vec<BString>,
    /// The client's agent string.
    pub agent: Option<BString>,
}

impl FetchRequest {
    /// Add a want, keeping request order and dropping duplicates.
    pub fn add_want(&mut self, oid: ObjectId) {
        if !self.wants.contains(&oid) {
            self.wants.push(oid);
        }
    }

    /// All wanted object ids: explicit wants plus resolved `want-ref` tips.
    pub fn all_wants(&self) -> Vec<ObjectId> {
        let mut all = self.wants.clone();
        for reference in &self.want_refs {
            if !all.contains(&reference.target) {
                all.push(reference.target);
            }
        }
        all
    }

    /// The client shallow boundary as a set.
    pub fn shallow_set(&self) -> HashSet<ObjectId> {
        self.client_shallow.iter().copied().collect()
    }

    /// Reject inconsistent option combinations after parsing finished.
    pub fn validate(&self) -> Result<()> {
        if self.wants.is_empty() && self.want_refs.is_empty() {
            return Err(Error::protocol("no wants given"));
        }
        Ok(())
    }
}

/// Parses the argument lines of a fetch exchange.
///
/// The same token grammar serves both dialects; the drivers feed it one
/// payload line at a time.
pub(crate) struct FetchParser<'a> {
    options: &'a ServerOptions,
    advertised: &'a [Reference],
}

impl<'a> FetchParser<'a> {
    pub(crate) fn new(options: &'a ServerOptions, advertised: &'a [Reference]) -> Self {
        Self {
            options,
            advertised,
        }
    }

    /// Apply one argument line to `req`. Unknown tokens are protocol errors
    /// naming the offending line.
    pub(crate) fn parse_line(&self, req: &mut FetchRequest, line: &BStr) -> Result<()> {
        if let Some(rest) = line.strip_prefix(b"want ") {
            req.add_want(parse_oid(rest.as_bstr())?);
        } else if let Some(rest) = line.strip_prefix(b"want-ref ") {
            self.parse_want_ref(req, rest.as_bstr())?;
        } else if let Some(rest) = line.strip_prefix(b"have ") {
            let oid = parse_oid(rest.as_bstr())?;
            if !req.haves.contains(&oid) {
                req.haves.push(oid);
            }
        } else if let Some(rest) = line.strip_prefix(b"shallow ") {
            let oid = parse_oid(rest.as_bstr())?;
            if !req.client_shallow.contains(&oid) {
                req.client_shallow.push(oid);
            }
        } else if let Some(rest) = line.strip_prefix(b"deepen ") {
            let depth: u32 = parse_number(rest.as_bstr())?;
            if depth < 1 {
                return Err(Error::protocol(format!("invalid deepen depth {depth}")));
            }
            self.set_deepen(req, Deepen::Depth(depth))?;
        } else if let Some(rest) = line.strip_prefix(b"deepen-since ") {
            let since: i64 = parse_number(rest.as_bstr())?;
            self.set_deepen(req, Deepen::Since(since))?;
        } else if let Some(rest) = line.strip_prefix(b"deepen-not ") {
            self.add_deepen_not(req, rest.as_bstr())?;
        } else if let Some(rest) = line.strip_prefix(b"filter ") {
            if !self.options.allow_filter {
                return Err(Error::FilterNotAllowed(BString::from(rest)));
            }
            req.filter = FilterSpec::parse(rest.as_bstr())?;
        } else if line == "thin-pack" {
            req.thin_pack = true;
        } else if line == "no-progress" {
            req.no_progress = true;
        } else if line == "include-tag" {
            req.include_tag = true;
        } else if line == "ofs-delta" {
            req.ofs_delta = true;
        } else if line == "done" {
            req.done = true;
        } else if let Some(rest) = line.strip_prefix(b"server-option=") {
            req.server_options.push(BString::from(rest));
        } else if let Some(rest) = line.strip_prefix(b"agent=") {
            req.agent = Some(BString::from(rest));
        } else {
            return Err(Error::protocol(format!("unexpected {line}")));
        }
        Ok(())
    }

    fn parse_want_ref(&self, req: &mut FetchRequest, name: &BStr) -> Result<()> {
        if !self.options.allow_ref_in_want {
            return Err(Error::protocol(format!("unexpected want-ref {name}")));
        }
        let reference = self
            .advertised
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RefNotFound(BString::from(name)))?;
        if !req.want_refs.iter().any(|r| r.name == reference.name) {
            req.want_refs.push(reference.clone());
        }
        Ok(())
    }

    fn set_deepen(&self, req: &mut FetchRequest, deepen: Deepen) -> Result<()> {
        match (&req.deepen, &deepen) {
            (Deepen::None, _) => {
                req.deepen = deepen;
                Ok(())
            }
            (Deepen::Depth(_), Deepen::Depth(_)) => {
                req.deepen = deepen;
                Ok(())
            }
            (Deepen::Since(_), Deepen::Since(_)) => {
                req.deepen = deepen;
                Ok(())
            }
            _ => Err(Error::protocol(
                "deepen, deepen-since and deepen-not cannot be combined",
            )),
        }
    }

    fn add_deepen_not(&self, req: &mut FetchRequest, name: &BStr) -> Result<()> {
        match &mut req.deepen {
            Deepen::None => {
                req.deepen = Deepen::Not(vec![BString::from(name)]);
                Ok(())
            }
            Deepen::Not(names) => {
                names.push(BString::from(name));
                Ok(())
            }
            _ => Err(Error::protocol(
                "deepen, deepen-since and deepen-not cannot be combined",
            )),
        }
    }
}

pub(crate) fn parse_oid(text: &BStr) -> Result<ObjectId> {
    let trimmed = text.trim();
    ObjectId::from_hex(trimmed)
        .map_err(|_| Error::protocol(format!("invalid object id {}", trimmed.as_bstr())))
}

fn parse_number<T: std::str::FromStr>(text: &BStr) -> Result<T> {
    text.trim()
        .to_str()
        .ok()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::protocol(format!("invalid number {}", text.trim().as_bstr())))
}
