//! Send-set enumeration: turning wants, commons and filters into the ordered
//! object list handed to the pack writer.

use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::store::ObjectDatabase;
use crate::types::{Kind, Reference};
use gix_hash::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};

/// The enumerated pack input.
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Objects to pack: commits first, then trees and blobs in traversal
    /// order, then appended tags.
    pub objects: Vec<ObjectId>,
    /// Objects known to be on the client side, offered as thin-pack bases.
    pub bases: HashSet<ObjectId>,
    /// Tree traversals performed, deduplicated per depth context.
    pub trees_traversed: usize,
}

impl Enumeration {
    /// Membership test over the enumerated objects.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains(id)
    }
}

/// Enumerates the object graph for one fetch.
pub struct Enumerator<'a> {
    store: &'a dyn ObjectDatabase,
    filter: &'a FilterSpec,
}

/// Parameters of one enumeration run.
pub struct EnumerateParams<'a> {
    /// Explicit wants in request order, any object kind.
    pub wants: &'a [ObjectId],
    /// The negotiated common-commit closure.
    pub common_closure: &'a HashSet<ObjectId>,
    /// The client's declared (or assumed) shallow boundary.
    pub client_shallow: &'a HashSet<ObjectId>,
    /// Commits eligible under a deepen clause; `None` leaves the walk
    /// unrestricted.
    pub selected: Option<&'a HashSet<ObjectId>>,
    /// Advertised refs, consulted when `include_tag` is set.
    pub advertised: &'a [Reference],
    /// Whether annotated tags pointing into the send-set are appended.
    pub include_tag: bool,
    /// Whether the pack may lean on client-side bases.
    pub thin_pack: bool,
}

impl<'a> Enumerator<'a> {
    /// Create an enumerator over `store` honoring `filter`.
    pub fn new(store: &'a dyn ObjectDatabase, filter: &'a FilterSpec) -> Self {
        Self { store, filter }
    }

    /// Run the enumeration.
    pub fn enumerate(&self, params: &EnumerateParams<'_>) -> Result<Enumeration> {
        let mut tag_objects = Vec::new();
        let mut commit_roots = Vec::new();
        let mut forced_seeds = Vec::new();
        for want in params.wants {
            self.classify_want(*want, &mut commit_roots, &mut forced_seeds, &mut tag_objects)?;
        }

        let commits = self.commits_to_send(&commit_roots, params)?;
        let uninteresting = self.client_side_objects(params.common_closure)?;

        let mut enumeration = Enumeration::default();
        if params.thin_pack {
            enumeration.bases = uninteresting.clone();
        }

        let mut included: HashSet<ObjectId> = commits.iter().copied().collect();
        let mut trees_and_blobs = Vec::new();
        self.walk_trees(
            &commits,
            &forced_seeds,
            &uninteresting,
            &mut included,
            &mut trees_and_blobs,
            &mut enumeration.trees_traversed,
        )?;

        let mut objects = commits;
        objects.extend(
            tag_objects
                .iter()
                .copied()
                .filter(|t| !uninteresting.contains(t) && included.insert(*t)),
        );
        objects.extend(trees_and_blobs);
        if params.include_tag {
            self.append_tags(params.advertised, &uninteresting, &mut included, &mut objects)?;
        }
        enumeration.objects = objects;
        Ok(enumeration)
    }

    /// Sort one want into the walk seeds: tags peel (collecting the chain),
    /// commits root the history walk, trees and blobs become forced seeds
    /// that bypass the filter.
    fn classify_want(
        &self,
        want: ObjectId,
        commit_roots: &mut Vec<ObjectId>,
        forced_seeds: &mut Vec<ObjectId>,
        tag_objects: &mut Vec<ObjectId>,
    ) -> Result<()> {
        let mut id = want;
        loop {
            if !self.store.contains(&id) {
                return Err(Error::MissingObject(id));
            }
            match self.store.info(&id)?.0 {
                Kind::Tag => {
                    if !tag_objects.contains(&id) {
                        tag_objects.push(id);
                    }
                    id = self.store.tag(&id)?.target;
                }
                Kind::Commit => {
                    if !commit_roots.contains(&id) {
                        commit_roots.push(id);
                    }
                    return Ok(());
                }
                Kind::Tree | Kind::Blob => {
                    if !forced_seeds.contains(&id) {
                        forced_seeds.push(id);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Walk history from the want commits, excluding what the client holds
    /// and pruning outside a deepen selection.
    ///
    /// Parents of a common commit are still walked when that commit is a
    /// client shallow boundary: the client holds the commit but nothing
    /// beneath it.
    fn commits_to_send(
        &self,
        roots: &[ObjectId],
        params: &EnumerateParams<'_>,
    ) -> Result<Vec<ObjectId>> {
        let mut commits = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(selected) = params.selected {
                if !selected.contains(&id) {
                    continue;
                }
            }
            let in_closure = params.common_closure.contains(&id);
            if !in_closure {
                commits.push(id);
            }
            if !in_closure || params.client_shallow.contains(&id) {
                queue.extend(self.store.commit(&id)?.parents.iter().copied());
            }
        }
        Ok(commits)
    }

    /// Everything the common closure implies the client already stores:
    /// the commits themselves plus their full tree content.
    fn client_side_objects(&self, closure: &HashSet<ObjectId>) -> Result<HashSet<ObjectId>> {
        let mut known: HashSet<ObjectId> = closure.clone();
        let mut queue = VecDeque::new();
        for commit in closure {
            if self.store.contains(commit) && self.store.info(commit)?.0 == Kind::Commit {
                queue.push_back(self.store.commit(commit)?.tree);
            }
        }
        while let Some(id) = queue.pop_front() {
            if !self.store.contains(&id) || !known.insert(id) {
                continue;
            }
            if self.store.info(&id)?.0 == Kind::Tree {
                for entry in self.store.tree(&id)? {
                    if entry.kind != Kind::Commit {
                        queue.push_back(entry.oid);
                    }
                }
            }
        }
        Ok(known)
    }

    /// Level-order traversal of the tree graph under the send-set commits.
    ///
    /// Depth contexts matter for `tree:<n>`: a tree revisited at the same or
    /// a deeper depth is skipped, while a shallower re-encounter traverses
    /// again, so the union over contexts is what gets sent. Level order makes
    /// the shallowest context come first.
    fn walk_trees(
        &self,
        commits: &[ObjectId],
        forced_seeds: &[ObjectId],
        uninteresting: &HashSet<ObjectId>,
        included: &mut HashSet<ObjectId>,
        output: &mut Vec<ObjectId>,
        trees_traversed: &mut usize,
    ) -> Result<()> {
        let depth_limit = self.filter.tree_depth_limit();
        let mut min_depth: HashMap<ObjectId, u64> = HashMap::new();
        let mut queue: VecDeque<(ObjectId, u64, bool)> = VecDeque::new();
        for commit in commits {
            queue.push_back((self.store.commit(commit)?.tree, 1, false));
        }
        for seed in forced_seeds {
            queue.push_back((*seed, 1, true));
        }
        while let Some((id, depth, forced)) = queue.pop_front() {
            if uninteresting.contains(&id) || !self.store.contains(&id) {
                continue;
            }
            match self.store.info(&id)?.0 {
                Kind::Tree => {
                    match min_depth.get(&id) {
                        Some(seen) if *seen <= depth => continue,
                        _ => {}
                    }
                    min_depth.insert(id, depth);
                    *trees_traversed += 1;
                    let keep = forced || depth_limit.map_or(true, |limit| depth <= limit);
                    if keep && included.insert(id) {
                        output.push(id);
                    }
                    if depth_limit.map_or(true, |limit| depth < limit) {
                        for entry in self.store.tree(&id)? {
                            if entry.kind != Kind::Commit {
                                queue.push_back((entry.oid, depth + 1, false));
                            }
                        }
                    }
                }
                Kind::Blob => {
                    if included.contains(&id) {
                        continue;
                    }
                    let (_, size) = self.store.info(&id)?;
                    if forced || self.filter.admits_blob(size) {
                        included.insert(id);
                        output.push(id);
                    }
                }
                Kind::Commit | Kind::Tag => {}
            }
        }
        Ok(())
    }

    /// Append annotated tags whose peeled target made it into the send-set.
    fn append_tags(
        &self,
        advertised: &[Reference],
        uninteresting: &HashSet<ObjectId>,
        included: &mut HashSet<ObjectId>,
        output: &mut Vec<ObjectId>,
    ) -> Result<()> {
        for reference in advertised {
            if !self.store.contains(&reference.target) {
                continue;
            }
            if self.store.info(&reference.target)?.0 != Kind::Tag {
                continue;
            }
            let mut chain = Vec::new();
            let mut id = reference.target;
            let target = loop {
                match self.store.info(&id)?.0 {
                    Kind::Tag => {
                        chain.push(id);
                        id = self.store.tag(&id)?.target;
                        if !self.store.contains(&id) {
                            break None;
                        }
                    }
                    _ => break Some(id),
                }
            };
            if target.map_or(false, |t| included.contains(&t)) {
                for tag in chain {
                    if !uninteresting.contains(&tag) && included.insert(tag) {
                        output.push(tag);
                    }
                }
            }
        }
        Ok(())
    }
}
