//! Server-side upload-pack engine for the hull toolkit.
//!
//! This crate implements the negotiation core of a fetch/clone server: it
//! parses the wire dialects (stateful V0 and stateless-command V2), validates
//! wants against a configurable request policy, negotiates a common base,
//! plans shallow frontiers and object filters, and drives an external pack
//! writer to stream the result.
//!
//! Storage is consumed through narrow traits ([`store::ObjectDatabase`],
//! [`store::RefStore`], [`store::ReachabilityBitmaps`], [`store::PackWriter`]);
//! in-memory implementations for tests and embedding live in
//! [`store::memory`].
//!
//! # Example
//!
//! ```no_run
//! use hull_upload_pack::{ServerOptions, UploadPack};
//! use hull_upload_pack::store::memory::{MemoryRefs, MemoryStore};
//!
//! let mut store = MemoryStore::new();
//! let tip = store.commit(&[], 1_700_000_000);
//! let mut refs = MemoryRefs::new();
//! refs.update("main", tip);
//!
//! let mut server = UploadPack::new(store, refs, ServerOptions::default());
//! let mut output = Vec::new();
//! server.upload(std::io::empty(), &mut output)?;
//! # Ok::<(), hull_upload_pack::Error>(())
//! ```

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod filter;
pub mod hooks;
mod negotiate;
mod pack;
pub mod policy;
pub mod protocol;
pub mod request;
mod sendset;
pub mod shallow;
pub mod store;
mod types;

pub use config::{ConfigSource, ServerOptions};
pub use error::{Error, Result};
pub use filter::FilterSpec;
pub use hooks::{NoopHooks, ProtocolHooks};
pub use negotiate::{AckRule, Negotiator};
pub use pack::{BufferedOutput, RawOutput, SidebandOutput};
pub use policy::{BitmapOracle, ReachabilityOracle, RequestPolicy, WalkOracle, WantValidator};
pub use request::{CapabilitiesRequest, Deepen, FetchRequest, LsRefsRequest};
pub use sendset::{EnumerateParams, Enumeration, Enumerator};
pub use shallow::ShallowPlan;
pub use types::*;

use crate::hooks::NoopHooks as DefaultHooks;
use crate::protocol::SessionContext;
use crate::store::memory::StreamPackWriter;
use crate::store::{
    KeepAllRefs, ObjectDatabase, PackWriter, ReachabilityBitmaps, RefFilterHook, RefStore,
};
use bstr::BString;
use gix_hash::ObjectId;
use hull_serve_core::pktline::{PacketReader, PacketWriter as PktWriter};
use hull_serve_core::protocol::ProtocolVersion;
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::debug;

/// One upload-pack server over a store and a reference namespace.
///
/// A single value serves one session at a time; sessions share nothing but
/// the read-only store, so independent sessions use independent values.
pub struct UploadPack<S, R> {
    store: S,
    refs: R,
    options: ServerOptions,
    policy: Option<RequestPolicy>,
    bitmaps: Option<Box<dyn ReachabilityBitmaps>>,
    pack_writer: Box<dyn PackWriter>,
    ref_filter: Box<dyn RefFilterHook>,
    hooks: Box<dyn ProtocolHooks>,
    extra_parameters: Vec<String>,
    assume_shallow: HashSet<ObjectId>,
    stats: PackStats,
    peer_agent: Option<BString>,
}

impl<S: ObjectDatabase, R: RefStore> UploadPack<S, R> {
    /// Create a server over `store` and `refs` with the given options.
    ///
    /// The default pack writer is the in-memory stream encoder; production
    /// embedders install their delta-compressing writer via
    /// [`set_pack_writer`](Self::set_pack_writer).
    pub fn new(store: S, refs: R, options: ServerOptions) -> Self {
        Self {
            store,
            refs,
            options,
            policy: None,
            bitmaps: None,
            pack_writer: Box::new(StreamPackWriter),
            ref_filter: Box::new(KeepAllRefs),
            hooks: Box::new(DefaultHooks),
            extra_parameters: Vec::new(),
            assume_shallow: HashSet::new(),
            stats: PackStats::default(),
            peer_agent: None,
        }
    }

    /// Override the request policy derived from the options.
    pub fn set_request_policy(&mut self, policy: RequestPolicy) -> &mut Self {
        self.policy = Some(policy);
        self
    }

    /// Install a reachability bitmap index.
    pub fn set_bitmaps(&mut self, bitmaps: impl ReachabilityBitmaps + 'static) -> &mut Self {
        self.bitmaps = Some(Box::new(bitmaps));
        self
    }

    /// Install the packfile encoder.
    pub fn set_pack_writer(&mut self, writer: impl PackWriter + 'static) -> &mut Self {
        self.pack_writer = Box::new(writer);
        self
    }

    /// Install the per-session reference filter hook.
    pub fn set_ref_filter(&mut self, filter: impl RefFilterHook + 'static) -> &mut Self {
        self.ref_filter = Box::new(filter);
        self
    }

    /// Install protocol observers.
    pub fn set_hooks(&mut self, hooks: impl ProtocolHooks + 'static) -> &mut Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Set the transport's extra parameters, e.g. `version=2`.
    pub fn set_extra_parameters(&mut self, parameters: Vec<String>) -> &mut Self {
        self.extra_parameters = parameters;
        self
    }

    /// Assume the client declared these shallow boundaries even if the
    /// request does not repeat them.
    pub fn assume_shallow(&mut self, boundaries: impl IntoIterator<Item = ObjectId>) -> &mut Self {
        self.assume_shallow.extend(boundaries);
        self
    }

    /// Statistics of the most recent session.
    pub fn stats(&self) -> &PackStats {
        &self.stats
    }

    /// The peer's agent string, once it introduced itself.
    pub fn peer_agent(&self) -> Option<&BString> {
        self.peer_agent.as_ref()
    }

    /// Serve one complete session over the given streams.
    ///
    /// The dialect is chosen from `protocol.version` and the transport's
    /// extra parameters. Errors the client should see are written as an
    /// `ERR` frame before this returns.
    pub fn upload<In: Read, Out: Write>(&mut self, input: In, output: Out) -> Result<()> {
        self.upload_with_messages(input, output, None)
    }

    /// Like [`upload`](Self::upload), with an out-of-band sink for
    /// human-readable messages on transports that carry one (an SSH stderr
    /// channel, say). It only sees messages the wire itself cannot deliver.
    pub fn upload_with_messages<In: Read, Out: Write>(
        &mut self,
        input: In,
        output: Out,
        messages: Option<&mut dyn hull_serve_core::progress::ProgressSink>,
    ) -> Result<()> {
        let mut snapshot = self.refs.snapshot()?;
        protocol::peel_refs(&self.store, &mut snapshot.refs)?;

        let visible: Vec<Reference> = snapshot
            .refs
            .iter()
            .filter(|r| !self.options.hidden_refs.is_hidden(r.name.as_ref()))
            .cloned()
            .collect();
        let visible = self.ref_filter.filter(visible);

        let mut advertised = Vec::with_capacity(visible.len() + 1);
        for symref in &snapshot.symrefs {
            if symref.name != "HEAD" {
                continue;
            }
            if let Some(target) = visible.iter().find(|r| r.name == symref.target) {
                advertised.push(Reference::new("HEAD", target.target));
            }
        }
        advertised.extend(visible);

        let version =
            ProtocolVersion::negotiate(self.options.protocol_version, &self.extra_parameters);
        debug!(?version, refs = advertised.len(), "session start");

        self.stats = PackStats::default();
        self.peer_agent = None;

        let mut reader = PacketReader::new(input);
        let mut out = PktWriter::new(output);
        let result = {
            let mut ctx = SessionContext {
                store: &self.store,
                options: &self.options,
                policy: self.policy.unwrap_or_else(|| self.options.request_policy()),
                bitmaps: self.bitmaps.as_deref(),
                pack_writer: &mut *self.pack_writer,
                hooks: &mut *self.hooks,
                snapshot: &snapshot,
                advertised,
                all_refs: snapshot.refs.clone(),
                assume_shallow: &self.assume_shallow,
                messages,
                stats: &mut self.stats,
                peer_agent: &mut self.peer_agent,
            };
            match version {
                ProtocolVersion::V2 => protocol::v2::serve(&mut ctx, &mut reader, &mut out),
                ProtocolVersion::V1 => protocol::v0::serve(&mut ctx, &mut reader, &mut out, true),
                ProtocolVersion::V0 => protocol::v0::serve(&mut ctx, &mut reader, &mut out, false),
            }
        };
        if let Err(error) = &result {
            debug!(%error, "session failed");
            if let Some(message) = error.client_message() {
                let _ = out.error(&message);
                let _ = out.flush();
            }
        }
        result
    }
}
