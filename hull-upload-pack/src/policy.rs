//! Request policies: which wants a session may ask for.

use crate::error::{Error, Result};
use crate::store::{ObjectDatabase, ReachabilityBitmaps};
use crate::types::{Kind, Reference};
use gix_hash::{oid, ObjectId};
use std::collections::{HashSet, VecDeque};

/// The policy constraining acceptable wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Wants must equal an advertised tip (or its peeled target).
    Advertised,
    /// Wants must be commits reachable from an advertised tip.
    ReachableCommit,
    /// Wants must equal a tip of the full, unfiltered ref set.
    Tip,
    /// Wants must be commits reachable from any unfiltered tip.
    ReachableCommitTip,
    /// Anything goes.
    Any,
}

/// Answers reachability questions from a set of tips.
///
/// Two implementations exist: one backed by precomputed bitmaps, one by
/// walking the commit graph. The policy engine selects one per session and
/// holds on to it.
pub trait ReachabilityOracle {
    /// Whether `target` is reachable from any of `tips`.
    fn reachable(&self, tips: &[ObjectId], target: &oid) -> Result<bool>;

    /// Whether a positive answer also covers trees and blobs, as bitmap
    /// lookups do.
    fn covers_non_commits(&self) -> bool {
        false
    }
}

/// Reachability by bounded commit-graph walk.
///
/// The walk terminates once the target is found or every tip's ancestry is
/// exhausted; only commits are visited, so non-commit targets always come
/// back unreachable.
pub struct WalkOracle<'a> {
    store: &'a dyn ObjectDatabase,
}

impl<'a> WalkOracle<'a> {
    /// Create a walk-backed oracle over `store`.
    pub fn new(store: &'a dyn ObjectDatabase) -> Self {
        Self { store }
    }
}

impl ReachabilityOracle for WalkOracle<'_> {
    fn reachable(&self, tips: &[ObjectId], target: &oid) -> Result<bool> {
        let target = target.to_owned();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();
        let mut seen = HashSet::new();
        for tip in tips {
            if let Some(commit) = peel_to_commit(self.store, *tip)? {
                if seen.insert(commit) {
                    queue.push_back(commit);
                }
            }
        }
        while let Some(commit) = queue.pop_front() {
            if commit == target {
                return Ok(true);
            }
            for parent in self.store.commit(&commit)?.parents {
                if self.store.contains(&parent) && seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(false)
    }
}

/// Reachability by bitmap lookup, falling back to a walk from tips that are
/// not indexed.
pub struct BitmapOracle<'a> {
    bitmaps: &'a dyn ReachabilityBitmaps,
    store: &'a dyn ObjectDatabase,
}

impl<'a> BitmapOracle<'a> {
    /// Create a bitmap-backed oracle.
    pub fn new(bitmaps: &'a dyn ReachabilityBitmaps, store: &'a dyn ObjectDatabase) -> Self {
        Self { bitmaps, store }
    }
}

impl ReachabilityOracle for BitmapOracle<'_> {
    fn reachable(&self, tips: &[ObjectId], target: &oid) -> Result<bool> {
        let owned_target = target.to_owned();
        let mut unindexed = Vec::new();
        for tip in tips {
            match self.bitmaps.bitmap(tip) {
                Some(set) if set.contains(&owned_target) => return Ok(true),
                Some(_) => {}
                None => unindexed.push(*tip),
            }
        }
        if unindexed.is_empty() {
            return Ok(false);
        }
        WalkOracle::new(self.store).reachable(&unindexed, target)
    }

    fn covers_non_commits(&self) -> bool {
        true
    }
}

/// Resolve a possibly-tag object down to a commit, if the chain ends in one.
pub(crate) fn peel_to_commit(
    store: &dyn ObjectDatabase,
    mut id: ObjectId,
) -> Result<Option<ObjectId>> {
    loop {
        if !store.contains(&id) {
            return Ok(None);
        }
        match store.info(&id)?.0 {
            Kind::Commit => return Ok(Some(id)),
            Kind::Tag => id = store.tag(&id)?.target,
            Kind::Tree | Kind::Blob => return Ok(None),
        }
    }
}

/// Validates every want against the session policy.
pub struct WantValidator<'a> {
    store: &'a dyn ObjectDatabase,
    policy: RequestPolicy,
    oracle: Box<dyn ReachabilityOracle + 'a>,
}

/// The tips of a reference set, target and peeled ids alike.
pub(crate) fn ref_tips(refs: &[Reference]) -> Vec<ObjectId> {
    let mut tips = Vec::with_capacity(refs.len());
    for reference in refs {
        if !tips.contains(&reference.target) {
            tips.push(reference.target);
        }
        if let Some(peeled) = reference.peeled {
            if !tips.contains(&peeled) {
                tips.push(peeled);
            }
        }
    }
    tips
}

impl<'a> WantValidator<'a> {
    /// Create a validator; a bitmap-backed oracle is selected when bitmaps
    /// are available, a walk otherwise.
    pub fn new(
        store: &'a dyn ObjectDatabase,
        policy: RequestPolicy,
        bitmaps: Option<&'a dyn ReachabilityBitmaps>,
    ) -> Self {
        let oracle: Box<dyn ReachabilityOracle + 'a> = match bitmaps {
            Some(bitmaps) => Box::new(BitmapOracle::new(bitmaps, store)),
            None => Box::new(WalkOracle::new(store)),
        };
        Self {
            store,
            policy,
            oracle,
        }
    }

    /// Check every explicit want; the first rejection fails the session
    /// before any pack byte is written.
    pub fn validate(
        &self,
        wants: &[ObjectId],
        advertised: &[Reference],
        all_refs: &[Reference],
    ) -> Result<()> {
        if self.policy == RequestPolicy::Any {
            return Ok(());
        }
        let advertised_tips = ref_tips(advertised);
        let all_tips = ref_tips(all_refs);
        for want in wants {
            self.validate_one(*want, &advertised_tips, &all_tips)?;
        }
        Ok(())
    }

    fn validate_one(
        &self,
        want: ObjectId,
        advertised_tips: &[ObjectId],
        all_tips: &[ObjectId],
    ) -> Result<()> {
        if !self.store.contains(&want) {
            return Err(Error::WantNotValid(want));
        }
        let (kind, _) = self.store.info(&want)?;
        let accepted = match self.policy {
            RequestPolicy::Any => true,
            RequestPolicy::Advertised => advertised_tips.contains(&want),
            RequestPolicy::Tip => all_tips.contains(&want),
            RequestPolicy::ReachableCommit => {
                self.check_reachable(want, kind, advertised_tips)?
            }
            RequestPolicy::ReachableCommitTip => self.check_reachable(want, kind, all_tips)?,
        };
        if accepted {
            Ok(())
        } else {
            Err(Error::WantNotValid(want))
        }
    }

    fn check_reachable(&self, want: ObjectId, kind: Kind, tips: &[ObjectId]) -> Result<bool> {
        if tips.contains(&want) {
            return Ok(true);
        }
        if kind != Kind::Commit && !self.oracle.covers_non_commits() {
            return Ok(false);
        }
        self.oracle.reachable(tips, &want)
    }
}
