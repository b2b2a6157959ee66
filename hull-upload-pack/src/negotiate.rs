//! Common-base negotiation over `have` lines.

use crate::error::Result;
use crate::store::ObjectDatabase;
use crate::types::Kind;
use gix_hash::ObjectId;
use std::collections::{HashSet, VecDeque};

/// Incrementally extended ancestry of the wants, used to decide whether a
/// `have` is an ancestor of anything the client asked for.
struct WantAncestry {
    queue: VecDeque<ObjectId>,
    visited: HashSet<ObjectId>,
}

impl WantAncestry {
    fn new(wants: &[ObjectId]) -> Self {
        Self {
            queue: wants.iter().copied().collect(),
            visited: HashSet::new(),
        }
    }

    /// Extend the walk until `oid` is found or the ancestry is exhausted.
    /// Tags peel to their target, commits expand to their parents.
    fn contains(&mut self, store: &dyn ObjectDatabase, oid: ObjectId) -> Result<bool> {
        if self.visited.contains(&oid) {
            return Ok(true);
        }
        while let Some(id) = self.queue.pop_front() {
            if !store.contains(&id) || !self.visited.insert(id) {
                continue;
            }
            match store.info(&id)?.0 {
                Kind::Commit => {
                    for parent in store.commit(&id)?.parents {
                        if !self.visited.contains(&parent) {
                            self.queue.push_back(parent);
                        }
                    }
                }
                Kind::Tag => self.queue.push_back(store.tag(&id)?.target),
                Kind::Tree | Kind::Blob => {}
            }
            if id == oid {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// How a dialect decides whether a `have` the server possesses is common.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRule {
    /// Possession is enough, as in the stateless command dialect.
    Possession,
    /// The object must also be a want or an ancestor of one before it is
    /// acknowledged, as in the stateful dialect.
    WantAncestry,
}

/// Tracks the common set for one session and answers the stop condition.
pub struct Negotiator<'a> {
    store: &'a dyn ObjectDatabase,
    wants: Vec<ObjectId>,
    client_shallow: HashSet<ObjectId>,
    ancestry: WantAncestry,
    common: Vec<ObjectId>,
    common_set: HashSet<ObjectId>,
}

impl<'a> Negotiator<'a> {
    /// Create a negotiator for the given wants; `client_shallow` cuts the
    /// ancestry the client's haves are assumed to imply.
    pub fn new(
        store: &'a dyn ObjectDatabase,
        wants: Vec<ObjectId>,
        client_shallow: HashSet<ObjectId>,
    ) -> Self {
        Self {
            store,
            ancestry: WantAncestry::new(&wants),
            wants,
            client_shallow,
            common: Vec::new(),
            common_set: HashSet::new(),
        }
    }

    /// Process one `have` under the dialect's rule. Returns `true` if the
    /// object became common.
    pub fn record_have(&mut self, oid: ObjectId, rule: AckRule) -> Result<bool> {
        if self.common_set.contains(&oid) {
            return Ok(true);
        }
        if !self.store.contains(&oid) {
            return Ok(false);
        }
        if rule == AckRule::WantAncestry && !self.ancestry.contains(self.store, oid)? {
            return Ok(false);
        }
        self.common.push(oid);
        self.common_set.insert(oid);
        Ok(true)
    }

    /// The acknowledged common objects, in acknowledgment order.
    pub fn common(&self) -> &[ObjectId] {
        &self.common
    }

    /// Whether a complete pack can now be computed: every want is in the
    /// common set or has an ancestor there.
    pub fn is_ready(&self) -> Result<bool> {
        if self.common.is_empty() {
            return Ok(false);
        }
        for want in &self.wants {
            if !self.want_satisfied(*want)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn want_satisfied(&self, want: ObjectId) -> Result<bool> {
        let mut queue = VecDeque::from([want]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if self.common_set.contains(&id) {
                return Ok(true);
            }
            if !self.store.contains(&id) || !seen.insert(id) {
                continue;
            }
            match self.store.info(&id)?.0 {
                Kind::Commit => queue.extend(self.store.commit(&id)?.parents.iter().copied()),
                Kind::Tag => queue.push_back(self.store.tag(&id)?.target),
                Kind::Tree | Kind::Blob => {}
            }
        }
        Ok(false)
    }

    /// The closure of commits the client is known to hold: every common
    /// commit and its ancestry, cut at the client's shallow boundary.
    pub fn common_commit_closure(&self) -> Result<HashSet<ObjectId>> {
        let mut closure = HashSet::new();
        let mut queue: VecDeque<ObjectId> = self.common.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !closure.insert(id) {
                continue;
            }
            if !store_has_commit(self.store, id)? {
                continue;
            }
            if self.client_shallow.contains(&id) {
                continue;
            }
            for parent in self.store.commit(&id)?.parents {
                if self.store.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(closure)
    }
}

fn store_has_commit(store: &dyn ObjectDatabase, id: ObjectId) -> Result<bool> {
    Ok(store.contains(&id) && store.info(&id)?.0 == Kind::Commit)
}
