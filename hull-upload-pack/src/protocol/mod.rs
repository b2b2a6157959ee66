//! Dialect drivers and the session state they share.

use crate::config::ServerOptions;
use crate::error::{Error, Result};
use crate::hooks::ProtocolHooks;
use crate::negotiate::Negotiator;
use crate::policy::{RequestPolicy, WantValidator};
use crate::request::FetchRequest;
use crate::sendset::{EnumerateParams, Enumeration, Enumerator};
use crate::shallow::ShallowPlan;
use crate::store::{
    ObjectDatabase, PackWriter, ReachabilityBitmaps, RefSnapshot,
};
use crate::types::{Kind, PackStats, Reference};
use bstr::BString;
use gix_hash::ObjectId;
use hull_serve_core::pktline::{Packet, PacketReader};
use hull_serve_core::progress::ProgressSink;
use std::collections::HashSet;
use std::io::Read;

pub mod v0;
pub mod v2;

/// Everything a dialect driver needs for one session.
pub(crate) struct SessionContext<'a, 'm> {
    pub store: &'a dyn ObjectDatabase,
    pub options: &'a ServerOptions,
    pub policy: RequestPolicy,
    pub bitmaps: Option<&'a dyn ReachabilityBitmaps>,
    pub pack_writer: &'a mut dyn PackWriter,
    pub hooks: &'a mut dyn ProtocolHooks,
    /// The unfiltered snapshot taken at session start.
    pub snapshot: &'a RefSnapshot,
    /// Refs the client may see: `HEAD` first when resolvable, then the
    /// filtered snapshot, peel information attached.
    pub advertised: Vec<Reference>,
    /// The unfiltered refs with peel information, for tip policies.
    pub all_refs: Vec<Reference>,
    /// Shallow boundaries the server assumes the client has declared.
    pub assume_shallow: &'a HashSet<ObjectId>,
    /// Out-of-band sink for human-readable messages when the wire offers no
    /// progress channel.
    pub messages: Option<&'m mut dyn ProgressSink>,
    pub stats: &'a mut PackStats,
    pub peer_agent: &'a mut Option<BString>,
}

/// Attach the peeled target to refs that point at annotated tags.
pub(crate) fn peel_refs(store: &dyn ObjectDatabase, refs: &mut [Reference]) -> Result<()> {
    for reference in refs.iter_mut() {
        if reference.peeled.is_some() || !store.contains(&reference.target) {
            continue;
        }
        if store.info(&reference.target)?.0 == Kind::Tag {
            let mut id = reference.target;
            while store.contains(&id) && store.info(&id)?.0 == Kind::Tag {
                id = store.tag(&id)?.target;
            }
            reference.peeled = Some(id);
        }
    }
    Ok(())
}

impl SessionContext<'_, '_> {
    /// Record the peer's agent string once it shows up.
    pub(crate) fn note_agent(&mut self, agent: &Option<BString>) {
        if let Some(agent) = agent {
            *self.peer_agent = Some(agent.clone());
        }
    }

    /// Validate the explicit wants against the session policy; `want-ref`
    /// targets are advertised by construction and need no check.
    pub(crate) fn validate_wants(&self, req: &FetchRequest) -> Result<()> {
        let validator = WantValidator::new(self.store, self.policy, self.bitmaps);
        validator.validate(&req.wants, &self.advertised, &self.all_refs)
    }

    /// The shallow boundary in effect: what the client declared in this
    /// request plus what the server was told to assume.
    pub(crate) fn effective_shallow(&self, req: &FetchRequest) -> Vec<ObjectId> {
        let mut shallow = req.client_shallow.clone();
        let mut assumed: Vec<ObjectId> = self
            .assume_shallow
            .iter()
            .copied()
            .filter(|id| !shallow.contains(id))
            .collect();
        assumed.sort();
        shallow.extend(assumed);
        shallow
    }

    /// Build a negotiator for this request.
    pub(crate) fn negotiator(&self, req: &FetchRequest) -> Negotiator<'_> {
        Negotiator::new(
            self.store,
            req.all_wants(),
            self.effective_shallow(req).into_iter().collect(),
        )
    }

    /// Compute the shallow frontier for this request; pure with respect to
    /// session state.
    pub(crate) fn shallow_plan(&self, req: &FetchRequest) -> Result<ShallowPlan> {
        ShallowPlan::compute(
            self.store,
            &req.all_wants(),
            &req.deepen,
            &self.effective_shallow(req),
            self.snapshot,
        )
    }

    /// Run the planning pipeline once the common closure is known: shallow
    /// frontier first, then object enumeration under the filter.
    pub(crate) fn plan_fetch(
        &mut self,
        req: &FetchRequest,
        common_closure: &HashSet<ObjectId>,
    ) -> Result<(ShallowPlan, Enumeration)> {
        let plan = self.shallow_plan(req)?;
        let shallow_set: HashSet<ObjectId> =
            self.effective_shallow(req).into_iter().collect();
        let enumeration = Enumerator::new(self.store, &req.filter).enumerate(&EnumerateParams {
            wants: &req.all_wants(),
            common_closure,
            client_shallow: &shallow_set,
            selected: plan.selected.as_ref(),
            advertised: &self.advertised,
            include_tag: req.include_tag,
            thin_pack: req.thin_pack,
        })?;
        self.stats.objects = enumeration.objects.len();
        self.stats.trees_traversed += enumeration.trees_traversed;
        Ok((plan, enumeration))
    }
}

/// Read the next packet, treating end-of-stream as a client disconnect.
pub(crate) fn require_packet<R: Read>(reader: &mut PacketReader<R>) -> Result<Packet> {
    reader.read_packet()?.ok_or(Error::ClientDisconnect)
}
